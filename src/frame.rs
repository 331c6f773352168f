//! RGBA frame buffers, pixel helpers and the shared quad mesh.

use anyhow::{anyhow, Result};
use bytemuck::{Pod, Zeroable};

/// Packed 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Builds a color from `0xRRGGBB`.
    pub const fn from_packed(packed: u32) -> Self {
        Self(
            ((packed >> 16) & 0xFF) as u8,
            ((packed >> 8) & 0xFF) as u8,
            (packed & 0xFF) as u8,
        )
    }

    pub fn to_packed(&self) -> u32 {
        ((self.0 as u32) << 16) | ((self.1 as u32) << 8) | self.2 as u32
    }

    pub fn to_unit(&self) -> [f32; 3] {
        [
            self.0 as f32 / 255.0,
            self.1 as f32 / 255.0,
            self.2 as f32 / 255.0,
        ]
    }
}

/// Row order of a pixel buffer as it came out of the rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    /// First row is the top of the image (image files, wgpu readback).
    TopDown,
    /// First row is the bottom of the image (GL `readPixels` convention).
    BottomUp,
}

impl RowOrder {
    pub fn flipped(self) -> Self {
        match self {
            RowOrder::TopDown => RowOrder::BottomUp,
            RowOrder::BottomUp => RowOrder::TopDown,
        }
    }
}

/// An RGBA8 frame read back from a rasterizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Row order of `data`
    pub rows: RowOrder,
    /// Tightly packed RGBA pixels
    pub data: Vec<u8>,
}

impl Frame {
    /// Creates a transparent top-down frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            rows: RowOrder::TopDown,
            data: vec![0; Self::byte_len(width, height)],
        }
    }

    /// Wraps existing RGBA data, checking its length.
    pub fn from_data(width: u32, height: u32, rows: RowOrder, data: Vec<u8>) -> Result<Self> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(anyhow!(
                "frame data is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self { width, height, rows, data })
    }

    fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    /// Mirrors the rows in place. Flipping twice restores the buffer.
    pub fn flip_vertical(&mut self) {
        let row = self.width as usize * 4;
        let height = self.height as usize;
        for y in 0..height / 2 {
            let (top, bottom) = self.data.split_at_mut((height - y - 1) * row);
            top[y * row..(y + 1) * row].swap_with_slice(&mut bottom[..row]);
        }
        self.rows = self.rows.flipped();
    }

    /// Returns the frame with its first row at the top.
    pub fn into_top_down(mut self) -> Self {
        if self.rows == RowOrder::BottomUp {
            self.flip_vertical();
        }
        self
    }

    /// RGBA value at (x, y) counted from the top-left corner.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let row = match self.rows {
            RowOrder::TopDown => y,
            RowOrder::BottomUp => self.height - 1 - y,
        };
        let i = (row as usize * self.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Makes every pixel whose color is exactly `key` fully transparent,
    /// whatever its alpha. Returns the number of keyed pixels.
    pub fn apply_chroma_key(&mut self, key: Rgb) -> usize {
        let mut keyed = 0;
        for px in self.data.chunks_exact_mut(4) {
            if px[0] == key.0 && px[1] == key.1 && px[2] == key.2 {
                px[3] = 0;
                keyed += 1;
            }
        }
        keyed
    }
}

pub const TRIANGLE_PAIR: usize = 2;
pub const TRIANGLE_VERTICES: usize = 3;

/// Vertex of the shared quad mesh. Only a position; all motion happens in
/// the vertex programs.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 2],
}

impl MeshVertex {
    /// Name of the position attribute in every filter's vertex program.
    pub const POSITION_ATTRIBUTE: &'static str = "meshPosition";
    /// Fixed shader location of the position attribute.
    pub const POSITION_LOCATION: u32 = 0;
    pub const COUNT: usize = TRIANGLE_PAIR * TRIANGLE_VERTICES;

    /// Two triangles covering [-1, 1] x [-1, 1]. Vertex `v` of triangle `t`
    /// is quad corner `t + v`, whose bits select the x and y sides.
    pub fn quad() -> [MeshVertex; Self::COUNT] {
        let mut vertices = [MeshVertex { position: [0.0; 2] }; Self::COUNT];
        for triangle in 0..TRIANGLE_PAIR {
            for vertex in 0..TRIANGLE_VERTICES {
                let corner = triangle + vertex;
                vertices[triangle * TRIANGLE_VERTICES + vertex] = MeshVertex {
                    position: [
                        (2 * (corner & 1)) as f32 - 1.0,
                        (2 * ((corner >> 1) & 1)) as f32 - 1.0,
                    ],
                };
            }
        }
        vertices
    }

    /// Returns the vertex buffer layout.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: MeshVertex::POSITION_LOCATION,
                format: wgpu::VertexFormat::Float32x2,
            }],
        }
    }
}

/// Vertex of the textured quad used to present frames in the window.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub tex_coords: [f32; 2],
}

impl QuadVertex {
    /// Vertices for a full-screen quad.
    pub const VERTICES: &'static [QuadVertex] = &[
        QuadVertex { position: [-1.0, -1.0], tex_coords: [0.0, 1.0] },
        QuadVertex { position: [1.0, -1.0], tex_coords: [1.0, 1.0] },
        QuadVertex { position: [1.0, 1.0], tex_coords: [1.0, 0.0] },
        QuadVertex { position: [-1.0, 1.0], tex_coords: [0.0, 0.0] },
    ];

    /// Indices for the quad (two triangles).
    pub const INDICES: &'static [u16] = &[0, 1, 2, 2, 3, 0];

    /// Returns the vertex buffer layout.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}
