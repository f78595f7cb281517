use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use vgpu::renderer::{
    AllocatorKind, ColorSurface, GuestMemory, NullCompiler, ProgramRef, RecordingBackend,
    SurfaceFormat, ThreadRegistry, VecGuestMemory,
};
use vgpu::{Renderer, RendererConfig};

const FRAME_FENCE: u64 = 0x40;
const DONE_FENCE: u64 = 0x48;
const GUEST_FENCE: u64 = 0x50;
const SURFACE_ADDR: u64 = 0x1000;
const PROGRAM_ADDR: u64 = 0x2000;

fn config() -> RendererConfig {
    let mut config = RendererConfig::default();
    config.processor.max_stall_ms = 20;
    config
}

fn setup() -> (Arc<VecGuestMemory>, Renderer, thread::JoinHandle<RecordingBackend>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let memory = Arc::new(VecGuestMemory::new(0x10000));
    for addr in [FRAME_FENCE, DONE_FENCE, GUEST_FENCE] {
        memory.create_sync_object(addr);
    }
    let program: Vec<u8> = [0x0800_0000_0000_0000u64, 0x0800_0000_0000_0001]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect();
    memory.write(PROGRAM_ADDR, &program).unwrap();

    let (renderer, mut processor) = Renderer::new(
        config(),
        memory.clone(),
        Arc::new(ThreadRegistry::new()),
        RecordingBackend::new().with_surface_fill(0x5A),
        Arc::new(NullCompiler::new()),
    )
    .unwrap();
    let render_thread = thread::spawn(move || {
        processor.run();
        std::mem::take(processor.backend_mut())
    });
    (memory, renderer, render_thread)
}

fn surface() -> ColorSurface {
    ColorSurface {
        addr: SURFACE_ADDR,
        width: 4,
        height: 4,
        format: SurfaceFormat::Rgba8,
    }
}

#[test]
fn lists_from_two_contexts_are_ordered_by_sync_objects() {
    let (memory, renderer, render_thread) = setup();
    let scene = renderer.create_context(AllocatorKind::Pool);
    let present = renderer.create_context(AllocatorKind::Heap);
    let program = ProgramRef {
        addr: PROGRAM_ADDR,
        word_count: 2,
    };

    let mut draw = renderer.command_list(&scene);
    draw.set_context(&surface())
        .set_programs(program, program)
        .draw(0, 3, 1);
    let rendered = renderer.promise_signal(&mut draw, FRAME_FENCE).unwrap();

    let mut flip = renderer.command_list(&present);
    flip.wait_sync_object(FRAME_FENCE, rendered)
        .set_context(&surface())
        .sync_surface_data()
        .new_frame();
    let done = renderer.promise_signal(&mut flip, DONE_FENCE).unwrap();

    renderer.submit(draw.finish()).unwrap();
    renderer.submit(flip.finish()).unwrap();

    let fence = memory.sync_object(DONE_FENCE).unwrap();
    let waiter = thread::spawn(move || fence.wait(done, Some(Duration::from_secs(5))));
    assert!(waiter.join().unwrap());

    let written = memory.to_vec(SURFACE_ADDR, surface().byte_len().unwrap()).unwrap();
    assert!(written.iter().all(|&b| b == 0x5A));
    let frame = renderer.display().dump_frame().unwrap();
    assert_eq!((frame.width, frame.height), (4, 4));

    renderer.shutdown();
    let backend = render_thread.join().unwrap();
    assert_eq!(backend.draws().count(), 1);

    let stats = renderer.stats().snapshot();
    assert_eq!(stats.lists_submitted, 2);
    assert_eq!(stats.lists_processed, 2);
    assert_eq!(stats.frames, 1);
    assert_eq!(stats.commands_skipped, 0);
    let json: serde_json::Value = serde_json::from_str(&renderer.stats().to_json()).unwrap();
    assert_eq!(json["frames"], 1);
}

#[test]
fn guest_signal_releases_a_waiting_list() {
    let (memory, renderer, render_thread) = setup();
    let ctx = renderer.create_context(AllocatorKind::Heap);
    let guest_fence = memory.sync_object(GUEST_FENCE).unwrap();
    let ready = guest_fence.promise_next();

    let mut list = renderer.command_list(&ctx);
    list.wait_sync_object(GUEST_FENCE, ready).nop();
    let done = renderer.promise_signal(&mut list, DONE_FENCE).unwrap();
    renderer.submit(list.finish()).unwrap();

    // Let the processor stall on the head at least once.
    thread::sleep(Duration::from_millis(100));
    let fence = memory.sync_object(DONE_FENCE).unwrap();
    assert!(!fence.is_ready(done));

    let guest = thread::spawn(move || guest_fence.signal(ready));
    assert!(fence.wait(done, Some(Duration::from_secs(5))));
    guest.join().unwrap();

    renderer.shutdown();
    render_thread.join().unwrap();
    assert!(renderer.stats().snapshot().stalls >= 1);
}
