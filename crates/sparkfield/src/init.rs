use feedback::{ScalarKind, StructLayout};
use programfile::{InitMode, Initialize};
use rand::prelude::*;
use tracing::debug;

/// Per-record initializer handed to [`feedback::ComputerDescription::initialize`].
pub type RecordInit = Box<dyn FnMut(u32, &mut [u8])>;

/// Builds the initializer for `preset`, or `None` when records start zeroed.
pub fn record_initializer(layout: &StructLayout, preset: &Initialize) -> Option<RecordInit> {
    match preset.mode {
        InitMode::Zero => None,
        InitMode::Uniform => {
            let rng = match preset.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            debug!(
                min = preset.min,
                max = preset.max,
                seed = preset.seed,
                "uniform record initializer"
            );
            let mut fill = UniformFill::new(layout, preset.min, preset.max, rng);
            Some(Box::new(move |_index, record| fill.write(record)))
        }
    }
}

/// Writes independent uniform samples into every 32-bit component.
struct UniformFill {
    words: Vec<ScalarKind>,
    min: f32,
    max: f32,
    rng: StdRng,
}

impl UniformFill {
    fn new(layout: &StructLayout, min: f32, max: f32, rng: StdRng) -> Self {
        let words = layout
            .fields()
            .iter()
            .flat_map(|field| {
                std::iter::repeat(field.ty.scalar()).take(field.ty.element_count() as usize)
            })
            .collect();
        Self {
            words,
            min,
            max,
            rng,
        }
    }

    fn write(&mut self, record: &mut [u8]) {
        for (kind, word) in self.words.iter().zip(record.chunks_exact_mut(4)) {
            let bytes = match kind {
                ScalarKind::Float => self.rng.gen_range(self.min..=self.max).to_le_bytes(),
                ScalarKind::Int => {
                    let (lo, hi) = (self.min.ceil() as i32, self.max.floor() as i32);
                    let value = if lo <= hi { self.rng.gen_range(lo..=hi) } else { lo };
                    value.to_le_bytes()
                }
                ScalarKind::Uint => {
                    let lo = self.min.max(0.0).ceil() as u32;
                    let hi = self.max.max(0.0).floor() as u32;
                    let value = if lo <= hi { self.rng.gen_range(lo..=hi) } else { lo };
                    value.to_le_bytes()
                }
            };
            word.copy_from_slice(&bytes);
        }
    }
}
