use glam::{Mat4, Vec2, Vec3};
use image::RgbaImage;
use pointcloud::gpu::{read_depth_texture, read_texture};
use pointcloud::layout::{compose_frame, decode_depth, CompositeLayout};
use pointcloud::{
    upload_frame, CaptureSampler, Diagnostics, FeedOutcome, GpuContext, GpuOptions, Metadata,
    MetadataDecoder, OffscreenTarget, PointCloudReconstructor, ReconstructOptions, RenderOutcome,
    SampleInputs, TextureDemuxer, VideoFeeder,
};

fn gpu() -> Option<GpuContext> {
    match GpuContext::new_headless(GpuOptions {
        allow_fallback: true,
        ..GpuOptions::default()
    }) {
        Ok(gpu) => Some(gpu),
        Err(err) => {
            eprintln!("skipping GPU test: {err:#}");
            None
        }
    }
}

fn record() -> Metadata {
    Metadata {
        camera_position: [0.5, 1.0, 2.0],
        camera_rotation: [0.0, 0.0, 0.0, 1.0],
        depth_range: [0.5, 4.0],
        ..Metadata::default()
    }
}

fn frame(width: u32, height: u32, meta: &Metadata) -> RgbaImage {
    let depth_height = height / 2;
    compose_frame(
        width,
        height,
        meta,
        |x, y| [(x % 200) as u8 + 40, (y % 200) as u8 + 40, 90],
        |_, y| 1.0 + 2.0 * y as f32 / depth_height as f32,
    )
}

fn camera_for(meta: &Metadata, width: u32, height: u32) -> pointcloud::Camera {
    let (color_width, color_height) = CompositeLayout::new(width, height).color_extent();
    meta.camera(color_width as f32 / color_height as f32, 0.05, 100.0)
}

#[test]
fn full_hd_frame_yields_expected_surfaces_and_points() {
    let Some(gpu) = gpu() else { return };
    let meta = record();
    let source = upload_frame(&gpu, "composite", &frame(1920, 1080, &meta));

    let mut feeder = VideoFeeder::new((1920, 1080));
    assert_eq!(feeder.update(&gpu, &source), FeedOutcome::Primed);
    assert!(feeder.demuxer().color_texture().is_none());
    assert_eq!(feeder.update(&gpu, &source), FeedOutcome::Demuxed);

    let color = feeder.demuxer().color_texture().expect("color surface");
    let depth = feeder.demuxer().depth_texture().expect("depth surface");
    assert_eq!((color.width(), color.height()), (960, 1080));
    assert_eq!((depth.width(), depth.height()), (960, 540));

    let camera = camera_for(&feeder.metadata(), 1920, 1080);
    let inputs = SampleInputs::from_demuxer(feeder.demuxer(), &camera).expect("inputs");
    let mut reconstructor = PointCloudReconstructor::new(ReconstructOptions::new(1.0, 0.01));
    let first = reconstructor
        .sample(&gpu, &inputs, Diagnostics::Off)
        .expect("sampled");
    assert_eq!(first.points, 518_400);
    assert!(first.reallocated);
    assert!(first.snapshot.is_none());

    let second = reconstructor
        .sample(&gpu, &inputs, Diagnostics::Off)
        .expect("sampled");
    assert!(!second.reallocated);

    reconstructor.set_quality(0.5);
    let third = reconstructor
        .sample(&gpu, &inputs, Diagnostics::Off)
        .expect("sampled");
    assert!(third.reallocated);
    assert_eq!(reconstructor.point_count(), 259_200);
}

#[test]
fn metadata_decodes_on_the_gpu() {
    let Some(gpu) = gpu() else { return };
    let meta = Metadata {
        camera_position: [-1.25, 0.75, 3.5],
        camera_rotation: [0.0, 0.38268343, 0.0, 0.9238795],
        center_shift: [0.02, -0.01],
        field_of_view: 1.1,
        depth_range: [0.2, 6.0],
        reserved: [0.0; 4],
    };
    let source = upload_frame(&gpu, "composite", &frame(640, 360, &meta));

    let mut decoder = MetadataDecoder::new();
    assert_eq!(decoder.metadata(), Metadata::default());
    decoder.decode(&gpu, &source);
    assert_eq!(decoder.metadata(), meta);
    assert_eq!(decoder.decoded_frames(), 1);
}

#[test]
fn frames_too_small_keep_previous_metadata() {
    let Some(gpu) = gpu() else { return };
    let tiny = upload_frame(&gpu, "tiny", &RgbaImage::new(64, 64));
    let mut decoder = MetadataDecoder::new();
    decoder.decode(&gpu, &tiny);
    assert_eq!(decoder.decoded_frames(), 0);
    assert_eq!(decoder.metadata(), Metadata::default());
}

#[test]
fn demuxed_depth_matches_host_decode() {
    let Some(gpu) = gpu() else { return };
    let meta = record();
    let image = frame(640, 360, &meta);
    let source = upload_frame(&gpu, "composite", &image);

    let mut feeder = VideoFeeder::new((640, 360));
    assert_eq!(feeder.settle(&gpu, &source), FeedOutcome::Demuxed);

    let depth = feeder.demuxer().depth_texture().expect("depth surface");
    let values = read_depth_texture(&gpu, depth).expect("depth readback");
    assert_eq!(values.len(), 320 * 180);

    for &(x, y) in &[(0u32, 0u32), (100, 45), (319, 179), (10, 120)] {
        let texel = image.get_pixel(320 + x, y).0;
        let expected = decode_depth([texel[0], texel[1], texel[2]], meta.depth_range);
        let actual = values[(y * 320 + x) as usize];
        assert!(
            (actual - expected).abs() < 1e-2,
            "depth at ({x}, {y}): {actual} vs {expected}"
        );
    }

    let color = feeder.demuxer().color_texture().expect("color surface");
    let pixels = read_texture(&gpu, color).expect("color readback");
    let offset = ((200 * 320 + 17) * 4) as usize;
    let expected = image.get_pixel(17, 200).0;
    for channel in 0..3 {
        let delta = i16::from(pixels[offset + channel]) - i16::from(expected[channel]);
        assert!(delta.abs() <= 1, "channel {channel} differs by {delta}");
    }
}

#[test]
fn feeder_demuxes_the_previous_frame_with_current_metadata() {
    let Some(gpu) = gpu() else { return };
    let first_meta = record();
    let second_meta = Metadata {
        camera_position: [-2.0, 0.25, 1.5],
        field_of_view: 0.7,
        depth_range: [0.3, 6.0],
        ..Metadata::default()
    };
    let first = upload_frame(
        &gpu,
        "first",
        &compose_frame(640, 360, &first_meta, |_, _| [200, 30, 30], |_, _| 1.0),
    );
    let second = upload_frame(
        &gpu,
        "second",
        &compose_frame(640, 360, &second_meta, |_, _| [30, 30, 200], |_, _| 2.0),
    );

    let mut feeder = VideoFeeder::new((640, 360));
    assert_eq!(feeder.update(&gpu, &first), FeedOutcome::Primed);
    assert_eq!(feeder.metadata(), first_meta);
    assert_eq!(feeder.update(&gpu, &second), FeedOutcome::Demuxed);
    assert_eq!(feeder.metadata(), second_meta);

    let color = feeder.demuxer().color_texture().expect("color surface");
    let pixels = read_texture(&gpu, color).expect("color readback");
    for &(x, y) in &[(0u32, 0u32), (160, 180), (319, 359)] {
        let offset = ((y * 320 + x) * 4) as usize;
        let texel = &pixels[offset..offset + 3];
        assert!(
            texel[0] > 190 && texel[2] < 40,
            "texel ({x}, {y}) should come from the first frame: {texel:?}"
        );
    }

    assert_eq!(feeder.update(&gpu, &second), FeedOutcome::Demuxed);
    let color = feeder.demuxer().color_texture().expect("color surface");
    let pixels = read_texture(&gpu, color).expect("color readback");
    assert!(pixels[2] > 190 && pixels[0] < 40, "second frame not demuxed on the next tick");
}

#[test]
fn demux_surfaces_keep_their_first_size() {
    let Some(gpu) = gpu() else { return };
    let meta = record();
    let small = upload_frame(&gpu, "small", &frame(640, 360, &meta));
    let large = upload_frame(&gpu, "large", &frame(1280, 720, &meta));

    let mut demuxer = TextureDemuxer::new();
    assert!(demuxer.depth_texture().is_none());
    demuxer.demux(&gpu, &small, &meta);
    demuxer.demux(&gpu, &large, &meta);

    let color = demuxer.color_texture().expect("color surface");
    let depth = demuxer.depth_texture().expect("depth surface");
    assert_eq!((color.width(), color.height()), (320, 360));
    assert_eq!((depth.width(), depth.height()), (320, 180));
}

#[test]
fn reconstructed_points_match_host_unprojection() {
    let Some(gpu) = gpu() else { return };
    let meta = record();
    let source = upload_frame(&gpu, "composite", &frame(640, 360, &meta));
    let mut feeder = VideoFeeder::new((640, 360));
    feeder.settle(&gpu, &source);

    let camera = camera_for(&feeder.metadata(), 640, 360);
    let inputs = SampleInputs::from_demuxer(feeder.demuxer(), &camera).expect("inputs");
    let depth_values = read_depth_texture(&gpu, inputs.depth).expect("depth readback");

    let mut reconstructor = PointCloudReconstructor::new(ReconstructOptions::new(1.0, 0.01));
    let sampled = reconstructor
        .sample(&gpu, &inputs, Diagnostics::Snapshot)
        .expect("sampled");
    let snapshot = sampled.snapshot.expect("snapshot requested");
    assert_eq!(snapshot.points.len(), 320 * 180);
    assert_eq!(snapshot.gizmo_points(5, 1000).count(), 1000);

    for &pixel in &[0usize, 1_000, 25_000, 57_599] {
        let (x, y) = ((pixel % 320) as f32, (pixel / 320) as f32);
        let uv = Vec2::new((x + 0.5) / 320.0, 1.0 - (y + 0.5) / 180.0);
        let expected = camera.unproject(uv, depth_values[pixel]);
        let actual = snapshot.points[pixel];
        assert!(
            (actual - expected).length() < 1e-3,
            "pixel {pixel}: {actual} vs {expected}"
        );
    }

    let (_, colors) = reconstructor.read_back(&gpu).expect("readback");
    let first = colors[0];
    assert!((first[0] - 40.0 / 255.0).abs() < 1e-2);
    assert!((first[2] - 90.0 / 255.0).abs() < 1e-2);
}

#[test]
fn capture_session_aggregates_and_replays() {
    let Some(gpu) = gpu() else { return };
    let meta = record();
    let source = upload_frame(&gpu, "composite", &frame(640, 360, &meta));
    let mut feeder = VideoFeeder::new((640, 360));
    feeder.settle(&gpu, &source);
    let camera = camera_for(&feeder.metadata(), 640, 360);
    let inputs = SampleInputs::from_demuxer(feeder.demuxer(), &camera).expect("inputs");

    let mut sampler =
        CaptureSampler::new(PointCloudReconstructor::new(ReconstructOptions::new(0.5, 0.01)));
    assert_eq!(sampler.sample_frame(&gpu, &inputs), None);

    sampler.begin_sample();
    let mut total = 0;
    for _ in 0..3 {
        total += sampler.sample_frame(&gpu, &inputs).expect("frame sampled");
    }
    assert_eq!(total, 3 * 28_800);
    let session = sampler.session().expect("session").clone();
    assert_eq!(session.points.len(), total);
    assert_eq!(session.colors.len(), total);
    assert_eq!(session.frames, 3);

    let summary = sampler.end_sample(&gpu).expect("summary");
    assert_eq!(summary.points, total);
    assert_eq!(summary.frames, 3);
    assert!(summary.replaying);
    assert_eq!(sampler.replay().map(|replay| replay.len()), Some(total as u32));

    let (points, colors) = sampler.read_replay(&gpu).expect("replay readback");
    assert_eq!(points, session.points);
    assert_eq!(colors, session.colors);

    sampler.begin_sample();
    assert!(sampler.replay().is_none());
    sampler.abort_sample();
    assert!(sampler.end_sample(&gpu).is_none());
}

#[test]
fn live_tick_draws_into_offscreen_target() {
    let Some(gpu) = gpu() else { return };
    let meta = Metadata {
        depth_range: [0.5, 4.0],
        ..Metadata::default()
    };
    let source = upload_frame(&gpu, "composite", &frame(640, 360, &meta));
    let mut feeder = VideoFeeder::new((640, 360));
    feeder.settle(&gpu, &source);
    let camera = camera_for(&feeder.metadata(), 640, 360);
    let inputs = SampleInputs::from_demuxer(feeder.demuxer(), &camera).expect("inputs");

    let target = OffscreenTarget::new(&gpu, (64, 64));
    let viewer = pointcloud::Camera::new(60f32.to_radians(), target.aspect(), 0.05, 100.0)
        .with_world(Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0)));
    let mut sampler =
        CaptureSampler::new(PointCloudReconstructor::new(ReconstructOptions::new(1.0, 0.05)));
    let snapshot = sampler.update(
        &gpu,
        Some(&inputs),
        Some(&target.view(&viewer, Some(wgpu::Color::BLACK))),
        Diagnostics::Off,
    );
    assert!(snapshot.is_none());

    let image = target.read_image(&gpu).expect("offscreen readback");
    let lit = image.pixels().filter(|pixel| pixel.0[0] > 0).count();
    assert!(lit > 0, "no pixel was drawn");

    let outcome = sampler
        .reconstructor_mut()
        .render_current(&gpu, &target.view(&viewer, None));
    assert_eq!(outcome, RenderOutcome::Drawn { instances: 57_600 });
}

#[test]
fn dispose_twice_after_allocation_is_harmless() {
    let Some(gpu) = gpu() else { return };
    let meta = record();
    let source = upload_frame(&gpu, "composite", &frame(640, 360, &meta));
    let mut feeder = VideoFeeder::new((640, 360));
    feeder.settle(&gpu, &source);
    let camera = camera_for(&feeder.metadata(), 640, 360);
    let inputs = SampleInputs::from_demuxer(feeder.demuxer(), &camera).expect("inputs");

    let mut reconstructor = PointCloudReconstructor::new(ReconstructOptions::new(1.0, 0.01));
    reconstructor.sample(&gpu, &inputs, Diagnostics::Off);
    reconstructor.dispose();
    reconstructor.dispose();
    assert!(reconstructor.points().is_none());

    let again = reconstructor
        .sample(&gpu, &inputs, Diagnostics::Off)
        .expect("sampled after dispose");
    assert!(again.reallocated);
}
