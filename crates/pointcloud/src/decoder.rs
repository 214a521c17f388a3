use anyhow::Result;

use crate::compile::{compile_wgsl, METADATA_KERNEL_WGSL};
use crate::gpu::{Binding, BindingKind, DispatchDescriptor, GpuContext, KernelProgram, Readback};
use crate::layout::CompositeLayout;
use crate::types::{Metadata, METADATA_WORDS};

/// Extracts the metadata record of a composite frame.
///
/// Each decode runs one workgroup over the metadata cells and blocks on the
/// readback of the sixteen result words.
#[derive(Default)]
pub struct MetadataDecoder {
    program: Option<KernelProgram>,
    output: Option<wgpu::Buffer>,
    readback: Readback,
    metadata: Metadata,
    decoded: u64,
}

impl MetadataDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last successfully decoded record, or the default before the first one.
    pub fn metadata(&self) -> Metadata {
        self.metadata
    }

    /// Number of successful decodes so far.
    pub fn decoded_frames(&self) -> u64 {
        self.decoded
    }

    pub fn decode(&mut self, gpu: &GpuContext, source: &wgpu::Texture) {
        let layout = CompositeLayout::new(source.width(), source.height());
        if !layout.fits_metadata() {
            tracing::debug!(
                width = source.width(),
                height = source.height(),
                "frame too small for metadata; keeping previous record"
            );
            return;
        }

        match self.run(gpu, source) {
            Ok(metadata) => {
                self.metadata = metadata;
                self.decoded += 1;
            }
            Err(err) => {
                tracing::warn!(error = %err, "metadata readback failed; keeping previous record");
            }
        }
    }

    fn run(&mut self, gpu: &GpuContext, source: &wgpu::Texture) -> Result<Metadata> {
        let program = self.program.get_or_insert_with(|| {
            let module = compile_wgsl(&gpu.device, "metadata kernel", METADATA_KERNEL_WGSL);
            KernelProgram::new(
                &gpu.device,
                "metadata kernel",
                &module,
                &[BindingKind::Texture, BindingKind::Storage { read_only: false }],
            )
        });
        let output = self.output.get_or_insert_with(|| {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("metadata record"),
                size: std::mem::size_of::<Metadata>() as u64,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        });

        let view = source.create_view(&wgpu::TextureViewDescriptor::default());
        DispatchDescriptor {
            label: "metadata decode",
            program,
            bindings: vec![Binding::Texture(&view), Binding::Buffer(output)],
            workgroups: [1, 1, 1],
        }
        .submit(gpu)?;

        let words: Vec<u32> = self.readback.read(gpu, output, METADATA_WORDS)?;
        let mut record = [0u32; METADATA_WORDS];
        record.copy_from_slice(&words);
        Ok(Metadata::from_words(record))
    }

    pub fn release(&mut self) {
        if let Some(output) = self.output.take() {
            output.destroy();
        }
        self.readback.release();
    }
}

impl Drop for MetadataDecoder {
    fn drop(&mut self) {
        self.release();
    }
}
