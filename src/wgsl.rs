use std::borrow::Cow;

/// A column major `mat3x3<f32>`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Mat3x3(pub [[f32; 3]; 3]);

impl Mat3x3 {
    /// Instantiates a new matrix from the given row arrays.
    pub fn from_rows_array(rows: [[f32; 3]; 3]) -> Self {
        let mut columns = [[0.0; 3]; 3];
        for (r, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                columns[c][r] = *v;
            }
        }

        Self(columns)
    }

    /// Returns the columns of the matrix.
    pub fn columns(&self) -> [[f32; 3]; 3] {
        self.0
    }
}

/// Types a vertex attribute may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeType {
    F32,
    Vec2F32,
    Vec3F32,
    Vec4F32,
}

impl AttributeType {
    /// Number of `f32` components of one element.
    pub fn components(self) -> usize {
        match self {
            AttributeType::F32 => 1,
            AttributeType::Vec2F32 => 2,
            AttributeType::Vec3F32 => 3,
            AttributeType::Vec4F32 => 4,
        }
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        self.components() * std::mem::size_of::<f32>()
    }

    pub fn wgsl_name(self) -> &'static str {
        match self {
            AttributeType::F32 => "f32",
            AttributeType::Vec2F32 => "vec2<f32>",
            AttributeType::Vec3F32 => "vec3<f32>",
            AttributeType::Vec4F32 => "vec4<f32>",
        }
    }

    pub fn from_wgsl(name: &str) -> Option<Self> {
        match name {
            "f32" => Some(AttributeType::F32),
            "vec2<f32>" | "vec2f" => Some(AttributeType::Vec2F32),
            "vec3<f32>" | "vec3f" => Some(AttributeType::Vec3F32),
            "vec4<f32>" | "vec4f" => Some(AttributeType::Vec4F32),
            _ => None,
        }
    }
}

/// Types a uniform struct member may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UniformType {
    F32,
    Vec2F32,
    Vec4F32,
    Mat3x3F32,
}

impl UniformType {
    /// Alignment in the uniform address space.
    pub fn align(self) -> usize {
        match self {
            UniformType::F32 => 4,
            UniformType::Vec2F32 => 8,
            UniformType::Vec4F32 => 16,
            UniformType::Mat3x3F32 => 16,
        }
    }

    /// Size in the uniform address space.
    pub fn size(self) -> usize {
        match self {
            UniformType::F32 => 4,
            UniformType::Vec2F32 => 8,
            UniformType::Vec4F32 => 16,
            UniformType::Mat3x3F32 => 48,
        }
    }

    pub fn wgsl_name(self) -> &'static str {
        match self {
            UniformType::F32 => "f32",
            UniformType::Vec2F32 => "vec2<f32>",
            UniformType::Vec4F32 => "vec4<f32>",
            UniformType::Mat3x3F32 => "mat3x3<f32>",
        }
    }

    pub fn from_wgsl(name: &str) -> Option<Self> {
        match name {
            "f32" => Some(UniformType::F32),
            "vec2<f32>" | "vec2f" => Some(UniformType::Vec2F32),
            "vec4<f32>" | "vec4f" => Some(UniformType::Vec4F32),
            "mat3x3<f32>" | "mat3x3f" => Some(UniformType::Mat3x3F32),
            _ => None,
        }
    }
}

/// Value of a uniform struct member.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    F32(f32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
    Mat3(Mat3x3),
}

impl UniformValue {
    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::F32(_) => UniformType::F32,
            UniformValue::Vec2(_) => UniformType::Vec2F32,
            UniformValue::Vec4(_) => UniformType::Vec4F32,
            UniformValue::Mat3(_) => UniformType::Mat3x3F32,
        }
    }

    fn write(&self, words: &mut [f32]) {
        match self {
            UniformValue::F32(v) => words[0] = *v,
            UniformValue::Vec2(v) => words[..2].copy_from_slice(v),
            UniformValue::Vec4(v) => words[..4].copy_from_slice(v),
            UniformValue::Mat3(m) => {
                // Every column is padded to the size of a `vec4<f32>`.
                for (i, column) in m.columns().iter().enumerate() {
                    words[i * 4..i * 4 + 3].copy_from_slice(column);
                }
            }
        }
    }
}

/// Member of a [`UniformLayout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    pub name: Cow<'static, str>,
    pub ty: UniformType,
    pub offset: usize,
}

/// Memory layout of a uniform struct following the rules of the uniform
/// address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    fields: Vec<UniformField>,
    size: usize,
}

impl UniformLayout {
    pub fn new(fields: &[(Cow<'static, str>, UniformType)]) -> Self {
        let mut offset: usize = 0;
        let mut struct_align = 16;
        let fields = fields
            .iter()
            .map(|(name, ty)| {
                offset = offset.next_multiple_of(ty.align());
                struct_align = struct_align.max(ty.align());
                let field = UniformField {
                    name: name.clone(),
                    ty: *ty,
                    offset,
                };
                offset += ty.size();
                field
            })
            .collect();

        Self {
            fields,
            size: offset.next_multiple_of(struct_align),
        }
    }

    /// Size of the struct in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.offset)
    }

    /// Packs the values into `f32` words; members without a value are zeroed.
    ///
    /// # Panics
    ///
    /// Panics if a value names an unknown member or has the wrong type.
    pub fn pack(&self, values: &[(&str, UniformValue)]) -> Vec<f32> {
        let mut words = vec![0.0; self.size / std::mem::size_of::<f32>()];
        for (name, value) in values {
            let field = self
                .fields
                .iter()
                .find(|f| f.name == *name)
                .unwrap_or_else(|| panic!("unknown uniform {name:?}, layout is {self:?}"));
            if field.ty != value.ty() {
                panic!(
                    "uniform {name:?} has type {:?}, got a value of type {:?}",
                    field.ty,
                    value.ty()
                );
            }

            let start = field.offset / std::mem::size_of::<f32>();
            value.write(&mut words[start..]);
        }

        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(fields: &[(&'static str, UniformType)]) -> UniformLayout {
        let fields = fields
            .iter()
            .map(|(n, t)| (Cow::Borrowed(*n), *t))
            .collect::<Vec<_>>();
        UniformLayout::new(&fields)
    }

    #[test]
    fn layout_follows_uniform_alignment() {
        let layout = layout(&[
            ("u_transform", UniformType::Mat3x3F32),
            ("u_viewport", UniformType::Vec2F32),
            ("u_size", UniformType::F32),
            ("u_color", UniformType::Vec4F32),
        ]);

        assert_eq!(layout.offset_of("u_transform"), Some(0));
        assert_eq!(layout.offset_of("u_viewport"), Some(48));
        assert_eq!(layout.offset_of("u_size"), Some(56));
        assert_eq!(layout.offset_of("u_color"), Some(64));
        assert_eq!(layout.size(), 80);
    }

    #[test]
    fn struct_size_is_rounded_to_sixteen() {
        let layout = layout(&[("u_size", UniformType::F32)]);
        assert_eq!(layout.size(), 16);
    }

    #[test]
    fn matrices_are_packed_column_major_with_padding() {
        let layout = layout(&[
            ("u_scale", UniformType::F32),
            ("u_transform", UniformType::Mat3x3F32),
        ]);
        let matrix = Mat3x3::from_rows_array([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        let words = layout.pack(&[
            ("u_transform", UniformValue::Mat3(matrix)),
            ("u_scale", UniformValue::F32(0.5)),
        ]);

        assert_eq!(words.len(), 16);
        assert_eq!(words[0], 0.5);
        assert_eq!(&words[4..7], &[1.0, 4.0, 7.0]);
        assert_eq!(words[7], 0.0);
        assert_eq!(&words[8..11], &[2.0, 5.0, 8.0]);
        assert_eq!(&words[12..15], &[3.0, 6.0, 9.0]);
    }

    #[test]
    #[should_panic(expected = "has type")]
    fn packing_a_mismatched_type_panics() {
        let layout = layout(&[("u_size", UniformType::F32)]);
        layout.pack(&[("u_size", UniformValue::Vec2([1.0, 2.0]))]);
    }
}
