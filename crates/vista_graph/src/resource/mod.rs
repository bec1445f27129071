//! Pooled resources flowing along graph edges.
//!
//! A [`Field2D`] is a 2D grid of `f32` samples (masks, heights, colors) and a
//! [`Buffer`] an opaque structured array. Both are cheap handles: cloning one
//! shares the underlying storage, and [`ResourceHandle`] gives the identity used
//! to tell whether two slots see the same resource.
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

pub mod pool;
pub mod sample;

pub use pool::ResourcePool;
pub use sample::{InstanceQuad, PositionSample};

/// Identity of a pooled resource, standing in for a device-side handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u64);

impl ResourceHandle {
    /// Handle of resources created outside the pool (previews, host copies).
    pub const DETACHED: ResourceHandle = ResourceHandle(0);
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Texel layout of a [`Field2D`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldFormat {
    /// Single channel, used for masks and heights.
    R32Float,
    /// Four channels, used for color textures.
    Rgba32Float,
}

impl FieldFormat {
    pub fn channels(self) -> usize {
        match self {
            FieldFormat::R32Float => 1,
            FieldFormat::Rgba32Float => 4,
        }
    }
}

/// Describes a pooled 2D field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RtDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: FieldFormat,
}

impl RtDescriptor {
    pub fn new(width: u32, height: u32, format: FieldFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Square single-channel field.
    pub fn mask(resolution: u32) -> Self {
        Self::new(resolution, resolution, FieldFormat::R32Float)
    }

    /// Square four-channel field.
    pub fn color(resolution: u32) -> Self {
        Self::new(resolution, resolution, FieldFormat::Rgba32Float)
    }

    /// Number of `f32` values needed to store the field.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.channels()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest side of the field.
    pub fn resolution(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// Describes a pooled structured buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    pub stride_bytes: u32,
    pub count: u32,
}

impl BufferDescriptor {
    pub fn new(stride_bytes: u32, count: u32) -> Self {
        Self {
            stride_bytes,
            count,
        }
    }

    /// Buffer holding `count` records of `T`.
    pub fn of<T>(count: u32) -> Self {
        Self::new(std::mem::size_of::<T>() as u32, count)
    }

    /// Number of `f32` words needed to store the buffer.
    pub fn words(&self) -> usize {
        (self.stride_bytes as usize * self.count as usize).div_ceil(4)
    }
}

/// A 2D grid of samples with shared storage.
#[derive(Clone)]
pub struct Field2D {
    desc: RtDescriptor,
    handle: ResourceHandle,
    data: Rc<RefCell<Vec<f32>>>,
}

impl Field2D {
    pub(crate) fn allocate(desc: RtDescriptor, handle: ResourceHandle) -> Self {
        Self {
            desc,
            handle,
            data: Rc::new(RefCell::new(vec![0.0; desc.len()])),
        }
    }

    /// Creates a field that is not owned by any pool.
    ///
    /// `data` is resized to the descriptor's length.
    pub fn detached(desc: RtDescriptor, mut data: Vec<f32>) -> Self {
        data.resize(desc.len(), 0.0);
        Self {
            desc,
            handle: ResourceHandle::DETACHED,
            data: Rc::new(RefCell::new(data)),
        }
    }

    pub fn descriptor(&self) -> RtDescriptor {
        self.desc
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn width(&self) -> usize {
        self.desc.width as usize
    }

    pub fn height(&self) -> usize {
        self.desc.height as usize
    }

    pub fn channels(&self) -> usize {
        self.desc.format.channels()
    }

    pub fn resolution(&self) -> u32 {
        self.desc.resolution()
    }

    pub fn read(&self) -> Ref<'_, Vec<f32>> {
        self.data.borrow()
    }

    pub fn write(&self) -> RefMut<'_, Vec<f32>> {
        self.data.borrow_mut()
    }

    /// Copies the samples out of the field.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.borrow().clone()
    }

    /// True when both handles point at the same storage.
    pub fn same_resource(&self, other: &Field2D) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    pub(crate) fn clear(&self) {
        self.data.borrow_mut().iter_mut().for_each(|v| *v = 0.0);
    }
}

impl fmt::Debug for Field2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field2D")
            .field("desc", &self.desc)
            .field("handle", &self.handle)
            .finish()
    }
}

/// A structured buffer stored as `f32` words.
#[derive(Clone)]
pub struct Buffer {
    desc: BufferDescriptor,
    handle: ResourceHandle,
    data: Rc<RefCell<Vec<f32>>>,
}

impl Buffer {
    pub(crate) fn allocate(desc: BufferDescriptor, handle: ResourceHandle) -> Self {
        Self {
            desc,
            handle,
            data: Rc::new(RefCell::new(vec![0.0; desc.words()])),
        }
    }

    /// Creates a buffer that is not owned by any pool.
    pub fn detached(desc: BufferDescriptor, data: Vec<f32>) -> Self {
        Self {
            desc,
            handle: ResourceHandle::DETACHED,
            data: Rc::new(RefCell::new(data)),
        }
    }

    pub fn descriptor(&self) -> BufferDescriptor {
        self.desc
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    /// Length of the stored data in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.borrow().len() * std::mem::size_of::<f32>()
    }

    pub fn read(&self) -> Ref<'_, Vec<f32>> {
        self.data.borrow()
    }

    pub fn write(&self) -> RefMut<'_, Vec<f32>> {
        self.data.borrow_mut()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data.borrow().clone()
    }

    pub fn same_resource(&self, other: &Buffer) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    /// Replaces the contents, growing or shrinking the storage.
    pub fn replace(&self, words: Vec<f32>) {
        *self.data.borrow_mut() = words;
    }

    pub(crate) fn reset(&self) {
        let mut data = self.data.borrow_mut();
        data.clear();
        data.resize(self.desc.words(), 0.0);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("desc", &self.desc)
            .field("handle", &self.handle)
            .finish()
    }
}

/// Either kind of pooled resource.
#[derive(Clone, Debug)]
pub enum Resource {
    Field(Field2D),
    Buffer(Buffer),
}

impl Resource {
    pub fn handle(&self) -> ResourceHandle {
        match self {
            Resource::Field(f) => f.handle(),
            Resource::Buffer(b) => b.handle(),
        }
    }

    pub fn as_field(&self) -> Option<&Field2D> {
        match self {
            Resource::Field(f) => Some(f),
            Resource::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Resource::Buffer(b) => Some(b),
            Resource::Field(_) => None,
        }
    }
}

/// Read-only sampling view over field storage.
pub struct FieldView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [f32],
}

impl<'a> FieldView<'a> {
    pub fn new(field: &Field2D, data: &'a [f32]) -> Self {
        Self {
            width: field.width(),
            height: field.height(),
            channels: field.channels(),
            data,
        }
    }

    /// Texel value with coordinates clamped to the edge.
    #[inline]
    pub fn at(&self, x: isize, y: isize, channel: usize) -> f32 {
        if self.width == 0 || self.height == 0 {
            return 0.0;
        }
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        let c = channel.min(self.channels - 1);
        self.data[(y * self.width + x) * self.channels + c]
    }

    /// Bilinear sample at normalized coordinates, texel centers at `(i + 0.5) / n`.
    pub fn bilinear(&self, u: f32, v: f32, channel: usize) -> f32 {
        let fx = u * self.width as f32 - 0.5;
        let fy = v * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as isize, y0 as isize);
        let a = self.at(x0, y0, channel);
        let b = self.at(x0 + 1, y0, channel);
        let c = self.at(x0, y0 + 1, channel);
        let d = self.at(x0 + 1, y0 + 1, channel);
        let top = a + (b - a) * tx;
        let bottom = c + (d - c) * tx;
        top + (bottom - top) * ty
    }

    /// Central-difference gradient in texels at normalized coordinates.
    pub fn gradient(&self, u: f32, v: f32) -> (f32, f32) {
        let du = 1.0 / self.width.max(1) as f32;
        let dv = 1.0 / self.height.max(1) as f32;
        let gx = (self.bilinear(u + du, v, 0) - self.bilinear(u - du, v, 0)) * 0.5;
        let gy = (self.bilinear(u, v + dv, 0) - self.bilinear(u, v - dv, 0)) * 0.5;
        (gx, gy)
    }
}
