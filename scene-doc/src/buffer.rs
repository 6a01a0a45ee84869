//! Binary buffer packing for export
//!
//! Packs attribute data into the single glTF buffer with 4-byte alignment and
//! creates the matching buffer views and accessors.

use gltf_json as json;
use gltf_json::validation::Checked::Valid;

/// Accessor index handed back by pack operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessorIndex(pub u32);

impl AccessorIndex {
    pub fn as_json_index(&self) -> json::Index<json::Accessor> {
        json::Index::new(self.0)
    }
}

/// Builder for the export buffer with automatic alignment.
#[derive(Default)]
pub struct BufferBuilder {
    buffer: Vec<u8>,
    views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
}

/// Align a byte buffer to a 4-byte boundary.
fn align(buffer: &mut Vec<u8>) {
    while buffer.len() % 4 != 0 {
        buffer.push(0);
    }
}

/// Min/max bounds over a position slice, as accessor JSON values.
fn position_bounds(positions: &[[f32; 3]]) -> (json::Value, json::Value) {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for pos in positions {
        for i in 0..3 {
            min[i] = min[i].min(pos[i]);
            max[i] = max[i].max(pos[i]);
        }
    }
    let to_value = |v: [f32; 3]| {
        json::Value::Array(v.iter().map(|f| json::Value::from(*f as f64)).collect())
    };
    (to_value(min), to_value(max))
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<json::buffer::View>, Vec<json::Accessor>) {
        (self.buffer, self.views, self.accessors)
    }

    fn push_view(
        &mut self,
        bytes: &[u8],
        target: Option<json::buffer::Target>,
    ) -> json::Index<json::buffer::View> {
        let offset = self.buffer.len();
        self.buffer.extend_from_slice(bytes);
        align(&mut self.buffer);

        self.views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: (bytes.len() as u64).into(),
            byte_offset: Some((offset as u64).into()),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: target.map(Valid),
        });
        json::Index::new(self.views.len() as u32 - 1)
    }

    fn push_accessor(
        &mut self,
        view: json::Index<json::buffer::View>,
        count: usize,
        component_type: json::accessor::ComponentType,
        type_: json::accessor::Type,
        min: Option<json::Value>,
        max: Option<json::Value>,
    ) -> AccessorIndex {
        let index = self.accessors.len() as u32;
        self.accessors.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(0u64.into()),
            count: count.into(),
            component_type: Valid(json::accessor::GenericComponentType(component_type)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(type_),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
        });
        AccessorIndex(index)
    }

    /// Pack positions with min/max bounds (required by the glTF spec).
    pub fn pack_positions(&mut self, positions: &[[f32; 3]]) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(positions),
            Some(json::buffer::Target::ArrayBuffer),
        );
        let (min, max) = position_bounds(positions);
        self.push_accessor(
            view,
            positions.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec3,
            Some(min),
            Some(max),
        )
    }

    pub fn pack_vec2(&mut self, data: &[[f32; 2]]) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(data),
            Some(json::buffer::Target::ArrayBuffer),
        );
        self.push_accessor(
            view,
            data.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec2,
            None,
            None,
        )
    }

    pub fn pack_vec3(&mut self, data: &[[f32; 3]]) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(data),
            Some(json::buffer::Target::ArrayBuffer),
        );
        self.push_accessor(
            view,
            data.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec3,
            None,
            None,
        )
    }

    pub fn pack_vec4(&mut self, data: &[[f32; 4]]) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(data),
            Some(json::buffer::Target::ArrayBuffer),
        );
        self.push_accessor(
            view,
            data.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec4,
            None,
            None,
        )
    }

    /// Pack joint indices as u16x4.
    pub fn pack_joints(&mut self, joints: &[[u16; 4]]) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(joints),
            Some(json::buffer::Target::ArrayBuffer),
        );
        self.push_accessor(
            view,
            joints.len(),
            json::accessor::ComponentType::U16,
            json::accessor::Type::Vec4,
            None,
            None,
        )
    }

    /// Pack triangle indices, choosing u16 or u32 storage by range.
    pub fn pack_indices(&mut self, indices: &[u32]) -> AccessorIndex {
        let fits_u16 = indices.iter().all(|&i| i <= u16::MAX as u32);
        if fits_u16 {
            let narrow: Vec<u16> = indices.iter().map(|&i| i as u16).collect();
            let view = self.push_view(
                bytemuck::cast_slice(&narrow),
                Some(json::buffer::Target::ElementArrayBuffer),
            );
            self.push_accessor(
                view,
                indices.len(),
                json::accessor::ComponentType::U16,
                json::accessor::Type::Scalar,
                None,
                None,
            )
        } else {
            let view = self.push_view(
                bytemuck::cast_slice(indices),
                Some(json::buffer::Target::ElementArrayBuffer),
            );
            self.push_accessor(
                view,
                indices.len(),
                json::accessor::ComponentType::U32,
                json::accessor::Type::Scalar,
                None,
                None,
            )
        }
    }

    /// Pack animation keyframe times with min/max bounds.
    pub fn pack_times(&mut self, times: &[f32]) -> AccessorIndex {
        let view = self.push_view(bytemuck::cast_slice(times), None);
        let min = times.iter().copied().fold(f32::INFINITY, f32::min) as f64;
        let max = times.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
        self.push_accessor(
            view,
            times.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Scalar,
            Some(json::Value::Array(vec![json::Value::from(min)])),
            Some(json::Value::Array(vec![json::Value::from(max)])),
        )
    }

    pub fn pack_scalars(&mut self, data: &[f32]) -> AccessorIndex {
        let view = self.push_view(bytemuck::cast_slice(data), None);
        self.push_accessor(
            view,
            data.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Scalar,
            None,
            None,
        )
    }

    /// Push raw encoded image bytes as a plain buffer view (no accessor).
    pub fn push_image(&mut self, bytes: &[u8]) -> json::Index<json::buffer::View> {
        self.push_view(bytes, None)
    }
}
