//! Byte layouts for unit records and uniform params.
//!
//! Records are tightly packed in declaration order: no padding, no alignment
//! beyond the 4-byte element width. The params block follows std140 because
//! it is bound as a uniform buffer.

use std::collections::HashSet;

use crate::error::{FeedbackError, Result};
use crate::types::{self, FieldType};

/// A named, typed declaration as it appears in generated GLSL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub ty: FieldType,
}

impl Declaration {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: FieldType,
    /// Byte offset inside one record.
    pub offset: u64,
    /// Vertex input slot; equal to the field's declaration index.
    pub location: u32,
}

/// Ordered, packed layout of one unit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    fields: Vec<FieldLayout>,
    record_size: u64,
}

impl StructLayout {
    /// Builds the layout in a single left-to-right pass over `fields`.
    pub fn new<I, N, T>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, T)>,
        N: AsRef<str>,
        T: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut layout = Vec::new();
        let mut offset = 0u64;
        for (index, (name, type_name)) in fields.into_iter().enumerate() {
            let name = name.as_ref();
            validate_identifier(name)?;
            if !seen.insert(name.to_string()) {
                return Err(FeedbackError::DuplicateField(name.to_string()));
            }
            let ty = types::resolve(name, type_name.as_ref())?;
            layout.push(FieldLayout {
                name: name.to_string(),
                ty,
                offset,
                location: index as u32,
            });
            offset += u64::from(ty.total_bytes());
        }

        if layout.is_empty() {
            return Err(FeedbackError::EmptyStruct);
        }

        Ok(Self {
            fields: layout,
            record_size: offset,
        })
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn record_size(&self) -> u64 {
        self.record_size
    }

    /// Number of 32-bit words per record.
    pub fn record_words(&self) -> u32 {
        (self.record_size / u64::from(types::ELEMENT_BYTES)) as u32
    }

    /// Declarations with every field name prefixed, in layout order.
    pub fn prefixed(&self, prefix: &str) -> Vec<Declaration> {
        self.fields
            .iter()
            .map(|field| Declaration::new(format!("{prefix}{}", field.name), field.ty))
            .collect()
    }

    /// Vertex attributes mapping each field onto its input slot.
    pub fn vertex_attributes(&self) -> Vec<wgpu::VertexAttribute> {
        self.fields
            .iter()
            .map(|field| wgpu::VertexAttribute {
                format: field.ty.vertex_format(),
                offset: field.offset,
                shader_location: field.location,
            })
            .collect()
    }
}

/// Offsets of each declaration when packed back to back, in 32-bit words.
pub(crate) fn packed_word_offsets(declarations: &[Declaration]) -> Vec<u32> {
    let mut offset = 0;
    declarations
        .iter()
        .map(|decl| {
            let current = offset;
            offset += decl.ty.element_count();
            current
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSlot {
    pub name: String,
    pub ty: FieldType,
    pub offset: u64,
}

/// std140 layout of the uniform params block of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamLayout {
    slots: Vec<ParamSlot>,
    size: u64,
}

impl ParamLayout {
    pub fn new<I, N, T>(params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, T)>,
        N: AsRef<str>,
        T: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut slots = Vec::new();
        let mut offset = 0u64;
        for (name, type_name) in params {
            let name = name.as_ref();
            validate_identifier(name)?;
            if !seen.insert(name.to_string()) {
                return Err(FeedbackError::DuplicateField(name.to_string()));
            }
            let ty = types::resolve(name, type_name.as_ref())?;
            let align = u64::from(ty.std140_alignment());
            offset = offset.next_multiple_of(align);
            slots.push(ParamSlot {
                name: name.to_string(),
                ty,
                offset,
            });
            offset += u64::from(ty.total_bytes());
        }

        // Uniform blocks are sized in whole vec4s.
        let size = offset.next_multiple_of(16);
        Ok(Self { slots, size })
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&ParamSlot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    /// Size of the backing uniform buffer in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn prefixed(&self, prefix: &str) -> Vec<Declaration> {
        self.slots
            .iter()
            .map(|slot| Declaration::new(format!("{prefix}{}", slot.name), slot.ty))
            .collect()
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_head || !valid_tail || name.starts_with("gl_") {
        return Err(FeedbackError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_packed(layout: &StructLayout) {
        let mut expected_offset = 0;
        for field in layout.fields() {
            assert_eq!(field.offset, expected_offset, "field {}", field.name);
            expected_offset += u64::from(field.ty.total_bytes());
        }
        assert_eq!(layout.record_size(), expected_offset);
    }

    #[test]
    fn packs_fields_back_to_back() {
        let layout = StructLayout::new([("pos", "vec2"), ("life", "float")]).unwrap();
        assert_eq!(layout.record_size(), 12);
        assert_eq!(layout.field("life").unwrap().offset, 8);
        assert_eq!(layout.record_words(), 3);
        assert_packed(&layout);
    }

    #[test]
    fn packing_invariant_holds_for_mixed_structs() {
        let descriptors: [&[(&str, &str)]; 4] = [
            &[("v", "float")],
            &[("a", "vec3"), ("b", "float"), ("c", "vec3")],
            &[("id", "uint"), ("pos", "vec3"), ("vel", "vec3"), ("tint", "vec4")],
            &[("cell", "ivec2"), ("age", "int"), ("mass", "float"), ("dir", "vec2")],
        ];
        for fields in descriptors {
            let layout = StructLayout::new(fields.iter().copied()).unwrap();
            assert_packed(&layout);
            let total: u64 = layout
                .fields()
                .iter()
                .map(|field| u64::from(field.ty.total_bytes()))
                .sum();
            assert_eq!(total, layout.record_size());
        }
    }

    #[test]
    fn preserves_declaration_order_as_locations() {
        let layout = StructLayout::new([("z", "float"), ("a", "vec2"), ("m", "vec3")]).unwrap();
        let names: Vec<_> = layout.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["z", "a", "m"]);
        let locations: Vec<_> = layout.fields().iter().map(|f| f.location).collect();
        assert_eq!(locations, [0, 1, 2]);
    }

    #[test]
    fn rejects_unknown_duplicate_and_empty() {
        assert!(matches!(
            StructLayout::new([("pos", "vec5")]),
            Err(FeedbackError::UnknownType { .. })
        ));
        assert!(matches!(
            StructLayout::new([("pos", "vec2"), ("pos", "float")]),
            Err(FeedbackError::DuplicateField(name)) if name == "pos"
        ));
        assert!(matches!(
            StructLayout::new(Vec::<(String, String)>::new()),
            Err(FeedbackError::EmptyStruct)
        ));
    }

    #[test]
    fn rejects_names_that_cannot_be_spliced_into_glsl() {
        for bad in ["", "1st", "has space", "gl_Position", "semi;colon"] {
            assert!(
                matches!(
                    StructLayout::new([(bad, "float")]),
                    Err(FeedbackError::InvalidIdentifier(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn vertex_attributes_share_record_offsets() {
        let layout = StructLayout::new([("pos", "vec3"), ("seed", "uint")]).unwrap();
        let attributes = layout.vertex_attributes();
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].shader_location, 1);
        assert_eq!(attributes[1].format, wgpu::VertexFormat::Uint32);
    }

    #[test]
    fn prefixed_declarations_keep_types() {
        let layout = StructLayout::new([("pos", "vec2"), ("life", "float")]).unwrap();
        let decls = layout.prefixed("i_");
        assert_eq!(decls[0].name, "i_pos");
        assert_eq!(decls[1].ty.name(), "float");
        assert_eq!(packed_word_offsets(&decls), vec![0, 2]);
    }

    #[test]
    fn params_follow_std140_alignment() {
        let params = ParamLayout::new([
            ("time", "float"),
            ("gravity", "vec3"),
            ("wind", "vec2"),
            ("frame", "float"),
        ])
        .unwrap();
        let offsets: Vec<_> = params.slots().iter().map(|s| s.offset).collect();
        assert_eq!(offsets, [0, 16, 32, 40]);
        assert_eq!(params.size(), 48);
    }

    #[test]
    fn empty_params_are_allowed() {
        let params = ParamLayout::new(Vec::<(&str, &str)>::new()).unwrap();
        assert!(params.is_empty());
        assert_eq!(params.size(), 0);
    }
}
