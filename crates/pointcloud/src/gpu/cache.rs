use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// GPU allocations that can be released ahead of their last handle dropping.
pub trait GpuResource {
    fn release(&self);
}

impl GpuResource for wgpu::Buffer {
    fn release(&self) {
        self.destroy();
    }
}

impl GpuResource for wgpu::Texture {
    fn release(&self) {
        self.destroy();
    }
}

/// Render target or sampled texture together with its default view.
pub struct Surface {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl Surface {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        (width, height): (u32, u32),
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }
}

impl GpuResource for Surface {
    fn release(&self) {
        self.texture.destroy();
    }
}

/// What to do when a resource is requested at a size other than the one it
/// was created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizePolicy {
    /// Release the old resource, then create a new one at the requested size.
    Recreate,
    /// Keep the first allocation regardless of later requests.
    Pinned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allocation {
    Created,
    Reused,
    Recreated,
    /// A pinned resource was requested at a different size and kept as is.
    SizeMismatch,
}

struct Entry<S, R> {
    size: S,
    resource: R,
}

/// Resources keyed by kind, remembering the size each was created at.
pub struct ResourceCache<K, S, R> {
    entries: HashMap<K, Entry<S, R>>,
}

impl<K, S, R> Default for ResourceCache<K, S, R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, S, R> ResourceCache<K, S, R>
where
    K: Copy + Eq + Hash + Debug,
    S: Copy + PartialEq + Debug,
    R: GpuResource,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the resource for `kind`, creating or replacing it according to
    /// `policy`.
    pub fn ensure<F>(&mut self, kind: K, size: S, policy: ResizePolicy, create: F) -> (&R, Allocation)
    where
        F: FnOnce(S) -> R,
    {
        let allocation = match self.entries.get(&kind) {
            None => Allocation::Created,
            Some(entry) if entry.size == size => Allocation::Reused,
            Some(_) if policy == ResizePolicy::Pinned => Allocation::SizeMismatch,
            Some(_) => Allocation::Recreated,
        };

        if matches!(allocation, Allocation::Created | Allocation::Recreated) {
            if let Some(previous) = self.entries.remove(&kind) {
                tracing::debug!(?kind, from = ?previous.size, to = ?size, "releasing stale resource");
                previous.resource.release();
            }
            let resource = create(size);
            self.entries.insert(kind, Entry { size, resource });
        }

        let entry = &self.entries[&kind];
        (&entry.resource, allocation)
    }

    pub fn get(&self, kind: K) -> Option<&R> {
        self.entries.get(&kind).map(|entry| &entry.resource)
    }

    pub fn size_of(&self, kind: K) -> Option<S> {
        self.entries.get(&kind).map(|entry| entry.size)
    }

    /// Releases the resource for `kind`. Returns whether one was held.
    pub fn invalidate(&mut self, kind: K) -> bool {
        match self.entries.remove(&kind) {
            Some(entry) => {
                entry.resource.release();
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.resource.release();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
