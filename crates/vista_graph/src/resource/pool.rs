//! Descriptor-keyed pool of fields and buffers.
//!
//! Graph outputs are registered under their [`SlotRef`] with the reference count
//! planned for the current evaluation; consumers release their reference once
//! they are done and the resource goes back to a free list when the count
//! reaches zero. Node-local scratch resources are registered by name instead.
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::graph::SlotRef;
use crate::resource::{Buffer, BufferDescriptor, Field2D, Resource, ResourceHandle, RtDescriptor};

struct OutputEntry {
    resource: Resource,
    ref_count: i32,
}

/// Pool of reusable fields and buffers.
pub struct ResourcePool {
    next_handle: u64,
    free_fields: HashMap<RtDescriptor, Vec<Field2D>>,
    free_buffers: HashMap<BufferDescriptor, Vec<Buffer>>,
    planned: HashMap<SlotRef, i32>,
    outputs: HashMap<SlotRef, OutputEntry>,
    temporaries: HashMap<String, Resource>,
    allocations: usize,
}

impl ResourcePool {
    /// Creates a new, empty pool.
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            free_fields: HashMap::new(),
            free_buffers: HashMap::new(),
            planned: HashMap::new(),
            outputs: HashMap::new(),
            temporaries: HashMap::new(),
            allocations: 0,
        }
    }

    /// Starts a new evaluation with the statically planned reference counts.
    ///
    /// Outputs still registered from a previous evaluation are reclaimed first.
    pub fn begin_evaluation(&mut self, planned: HashMap<SlotRef, i32>) {
        let leftover = self.reclaim_outputs();
        if leftover > 0 {
            debug!("Reclaimed {} outputs from a previous evaluation.", leftover);
        }
        self.planned = planned;
    }

    /// Reference count planned for `output` in the current evaluation.
    pub fn planned_count(&self, output: SlotRef) -> i32 {
        self.planned.get(&output).copied().unwrap_or(0)
    }

    /// Allocates or reuses a field and registers it as the resource of `output`.
    pub fn create_render_target(&mut self, desc: RtDescriptor, output: SlotRef) -> Field2D {
        self.reclaim(output);
        let field = self.acquire_field(desc);
        self.register(output, Resource::Field(field.clone()));
        field
    }

    /// Allocates or reuses a buffer and registers it as the resource of `output`.
    pub fn create_buffer(&mut self, desc: BufferDescriptor, output: SlotRef) -> Buffer {
        self.reclaim(output);
        let buffer = self.acquire_buffer(desc);
        self.register(output, Resource::Buffer(buffer.clone()));
        buffer
    }

    /// Allocates a node-local scratch field under `name`.
    pub fn create_temporary(&mut self, desc: RtDescriptor, name: &str) -> Field2D {
        self.release_existing_temporary(name);
        let field = self.acquire_field(desc);
        self.temporaries
            .insert(name.to_string(), Resource::Field(field.clone()));
        field
    }

    /// Allocates a node-local scratch buffer under `name`.
    pub fn create_temporary_buffer(&mut self, desc: BufferDescriptor, name: &str) -> Buffer {
        self.release_existing_temporary(name);
        let buffer = self.acquire_buffer(desc);
        self.temporaries
            .insert(name.to_string(), Resource::Buffer(buffer.clone()));
        buffer
    }

    /// Returns a scratch resource to the free lists. Returns `false` if unknown.
    pub fn release_temporary(&mut self, name: &str) -> bool {
        match self.temporaries.remove(name) {
            Some(resource) => {
                self.recycle(resource);
                true
            }
            None => false,
        }
    }

    /// Number of scratch resources currently held by nodes.
    pub fn live_temporaries(&self) -> usize {
        self.temporaries.len()
    }

    /// Current reference count of a registered output, `0` if not registered.
    pub fn reference_count(&self, output: SlotRef) -> i32 {
        self.outputs.get(&output).map(|e| e.ref_count).unwrap_or(0)
    }

    /// Resource registered for `output`, if any.
    pub fn resource(&self, output: SlotRef) -> Option<&Resource> {
        self.outputs.get(&output).map(|e| &e.resource)
    }

    pub fn is_registered(&self, output: SlotRef) -> bool {
        self.outputs.contains_key(&output)
    }

    /// Adds `delta` to the count of `output`, reclaiming it when it drops to zero.
    ///
    /// Returns the new count, or `None` if nothing is registered under `output`.
    pub fn adjust_reference(&mut self, output: SlotRef, delta: i32) -> Option<i32> {
        let entry = self.outputs.get_mut(&output)?;
        entry.ref_count += delta;
        let count = entry.ref_count;
        if count <= 0 {
            self.reclaim(output);
        }
        Some(count)
    }

    /// Drops one reference held by a consumer of `output`.
    pub fn release_reference(&mut self, output: SlotRef) -> Option<i32> {
        let count = self.adjust_reference(output, -1);
        if count.is_none() {
            debug!("Release of unregistered output {} ignored.", output);
        }
        count
    }

    /// Reclaims `output` if its count is not positive. Returns `true` if reclaimed.
    pub fn reclaim_if_unreferenced(&mut self, output: SlotRef) -> bool {
        match self.outputs.get(&output) {
            Some(entry) if entry.ref_count <= 0 => self.reclaim(output),
            _ => false,
        }
    }

    /// Returns every registered output to the free lists. Returns how many were reclaimed.
    pub fn reclaim_outputs(&mut self) -> usize {
        let refs: Vec<SlotRef> = self.outputs.keys().copied().collect();
        refs.into_iter().filter(|r| self.reclaim(*r)).count()
    }

    /// Number of registered outputs.
    pub fn registered_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Number of fields waiting for reuse.
    pub fn free_fields(&self) -> usize {
        self.free_fields.values().map(Vec::len).sum()
    }

    /// Number of buffers waiting for reuse.
    pub fn free_buffers(&self) -> usize {
        self.free_buffers.values().map(Vec::len).sum()
    }

    /// Total fields and buffers ever allocated by this pool.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    fn register(&mut self, output: SlotRef, resource: Resource) {
        let ref_count = self.planned_count(output);
        self.outputs.insert(
            output,
            OutputEntry {
                resource,
                ref_count,
            },
        );
    }

    fn reclaim(&mut self, output: SlotRef) -> bool {
        match self.outputs.remove(&output) {
            Some(entry) => {
                self.recycle(entry.resource);
                true
            }
            None => false,
        }
    }

    fn release_existing_temporary(&mut self, name: &str) {
        if self.release_temporary(name) {
            warn!("Temporary '{}' was still alive and has been replaced.", name);
        }
    }

    fn recycle(&mut self, resource: Resource) {
        match resource {
            Resource::Field(field) => self
                .free_fields
                .entry(field.descriptor())
                .or_default()
                .push(field),
            Resource::Buffer(buffer) => self
                .free_buffers
                .entry(buffer.descriptor())
                .or_default()
                .push(buffer),
        }
    }

    fn next_handle(&mut self) -> ResourceHandle {
        let handle = ResourceHandle(self.next_handle);
        self.next_handle += 1;
        self.allocations += 1;
        handle
    }

    fn acquire_field(&mut self, desc: RtDescriptor) -> Field2D {
        match self.free_fields.get_mut(&desc).and_then(Vec::pop) {
            Some(field) => {
                field.clear();
                field
            }
            None => {
                let handle = self.next_handle();
                Field2D::allocate(desc, handle)
            }
        }
    }

    fn acquire_buffer(&mut self, desc: BufferDescriptor) -> Buffer {
        match self.free_buffers.get_mut(&desc).and_then(Vec::pop) {
            Some(buffer) => {
                buffer.reset();
                buffer
            }
            None => {
                let handle = self.next_handle();
                Buffer::allocate(desc, handle)
            }
        }
    }
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeId, SlotId};

    fn slot(node: u32, slot: u32) -> SlotRef {
        SlotRef::new(NodeId(node), SlotId(slot))
    }

    fn pool_with_counts(counts: &[(SlotRef, i32)]) -> ResourcePool {
        let mut pool = ResourcePool::new();
        pool.begin_evaluation(counts.iter().copied().collect());
        pool
    }

    #[test]
    fn resource_survives_until_last_release() {
        let out = slot(1, 16);
        let mut pool = pool_with_counts(&[(out, 2)]);
        pool.create_render_target(RtDescriptor::mask(4), out);

        assert_eq!(pool.release_reference(out), Some(1));
        assert!(pool.is_registered(out));
        assert_eq!(pool.free_fields(), 0);

        assert_eq!(pool.release_reference(out), Some(0));
        assert!(!pool.is_registered(out));
        assert_eq!(pool.free_fields(), 1);

        // A stray release must not recycle the field twice.
        assert_eq!(pool.release_reference(out), None);
        assert_eq!(pool.free_fields(), 1);
    }

    #[test]
    fn reused_fields_come_back_zeroed() {
        let a = slot(1, 16);
        let b = slot(2, 16);
        let mut pool = pool_with_counts(&[(a, 1), (b, 1)]);
        let field = pool.create_render_target(RtDescriptor::mask(2), a);
        field.write().iter_mut().for_each(|v| *v = 9.0);
        let handle = field.handle();
        pool.release_reference(a);

        let reused = pool.create_render_target(RtDescriptor::mask(2), b);
        assert_eq!(reused.handle(), handle);
        assert!(reused.read().iter().all(|v| *v == 0.0));
        assert_eq!(pool.allocations(), 1);
    }

    #[test]
    fn descriptors_must_match_for_reuse() {
        let a = slot(1, 16);
        let b = slot(2, 16);
        let mut pool = pool_with_counts(&[(a, 1), (b, 1)]);
        pool.create_render_target(RtDescriptor::mask(2), a);
        pool.release_reference(a);
        pool.create_render_target(RtDescriptor::mask(4), b);
        assert_eq!(pool.allocations(), 2);
        assert_eq!(pool.free_fields(), 1);
    }

    #[test]
    fn temporaries_are_released_by_name() {
        let mut pool = ResourcePool::new();
        pool.create_temporary(RtDescriptor::mask(8), "node/a");
        pool.create_temporary_buffer(BufferDescriptor::new(4, 8), "node/b");
        assert_eq!(pool.live_temporaries(), 2);
        assert!(pool.release_temporary("node/a"));
        assert!(pool.release_temporary("node/b"));
        assert!(!pool.release_temporary("node/b"));
        assert_eq!(pool.live_temporaries(), 0);
        assert_eq!(pool.free_fields(), 1);
        assert_eq!(pool.free_buffers(), 1);
    }

    #[test]
    fn begin_evaluation_reclaims_previous_outputs() {
        let a = slot(1, 16);
        let mut pool = pool_with_counts(&[(a, 1)]);
        pool.create_buffer(BufferDescriptor::new(48, 2), a);
        pool.begin_evaluation(HashMap::new());
        assert_eq!(pool.registered_outputs(), 0);
        assert_eq!(pool.free_buffers(), 1);
    }

    #[test]
    fn unplanned_outputs_are_reclaimable_immediately() {
        let a = slot(1, 17);
        let mut pool = pool_with_counts(&[]);
        pool.create_render_target(RtDescriptor::mask(2), a);
        assert_eq!(pool.reference_count(a), 0);
        assert!(pool.reclaim_if_unreferenced(a));
        assert_eq!(pool.free_fields(), 1);
    }
}
