use std::sync::{Arc, Weak};

use super::handle::{Handle, ResourceKind, Tracked};

/// GPU memory in use, per resource category (bytes).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct GpuMemoryUsage {
    pub vertex_buffers: u64,
    pub index_buffers: u64,
    pub uniform_buffers: u64,
    pub textures: u64,
    pub frame_buffers: u64,
}

impl GpuMemoryUsage {
    pub fn total(&self) -> u64 {
        self.vertex_buffers
            + self.index_buffers
            + self.uniform_buffers
            + self.textures
            + self.frame_buffers
    }
}

/// Weak observations of every live resource.
///
/// Holds no ownership: dropping the last handle frees the resource regardless of
/// whether the registry was pruned.
#[derive(Default)]
pub(crate) struct ResourceRegistry {
    entries: Vec<Weak<dyn Tracked>>,
}

impl ResourceRegistry {
    pub fn register<I: Send + Sync + 'static>(&mut self, handle: &Handle<I>) {
        let weak: Weak<dyn Tracked> = Arc::downgrade(&handle.inner) as Weak<dyn Tracked>;
        self.entries.push(weak);
    }

    /// Drops observations whose resource is gone.
    pub fn prune(&mut self) {
        self.entries.retain(|w| w.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn usage(&self) -> GpuMemoryUsage {
        let mut usage = GpuMemoryUsage::default();
        for entry in self.entries.iter().filter_map(Weak::upgrade) {
            let bytes = entry.gpu_bytes();
            match entry.kind() {
                ResourceKind::VertexBuffer => usage.vertex_buffers += bytes,
                ResourceKind::IndexBuffer => usage.index_buffers += bytes,
                ResourceKind::UniformBuffer => usage.uniform_buffers += bytes,
                ResourceKind::Texture => usage.textures += bytes,
                ResourceKind::FrameBuffer => usage.frame_buffers += bytes,
                ResourceKind::ShaderProgram => {}
            }
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::resource::{IndexBufferInfo, Releaser, ResourceId};

    fn counting_releaser() -> (Releaser, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&released);
        let releaser: Releaser = Arc::new(move |_id: ResourceId| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        (releaser, released)
    }

    fn index_buffer(id: u64, bytes: u64, releaser: &Releaser) -> Handle<IndexBufferInfo> {
        Handle::new(
            ResourceId::from_raw(id),
            ResourceKind::IndexBuffer,
            IndexBufferInfo { count: (bytes / 4) as u32 },
            bytes,
            Arc::clone(releaser),
        )
    }

    #[test]
    fn usage_sums_live_resources_per_kind() {
        let (releaser, _) = counting_releaser();
        let mut registry = ResourceRegistry::default();

        let a = index_buffer(1, 24, &releaser);
        let b = index_buffer(2, 40, &releaser);
        registry.register(&a);
        registry.register(&b);

        let usage = registry.usage();
        assert_eq!(usage.index_buffers, 64);
        assert_eq!(usage.total(), 64);
    }

    #[test]
    fn dropped_resources_stop_counting_and_are_pruned() {
        let (releaser, released) = counting_releaser();
        let mut registry = ResourceRegistry::default();

        let a = index_buffer(1, 24, &releaser);
        let b = index_buffer(2, 40, &releaser);
        registry.register(&a);
        registry.register(&b);

        drop(a);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(registry.usage().index_buffers, 40);

        assert_eq!(registry.len(), 2);
        registry.prune();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn releaser_runs_once_for_last_clone() {
        let (releaser, released) = counting_releaser();
        let a = index_buffer(7, 4, &releaser);
        let b = a.clone();
        assert_eq!(a, b);

        drop(a);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
