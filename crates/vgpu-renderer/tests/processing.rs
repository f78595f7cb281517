use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use vgpu_renderer::{
    AllocatorKind, BackendCall, BatchProcessor, ColorSurface, CommandListBuilder, CompileError,
    ContextId, ExecutionContext, GuestMemory, NullCompiler, PipelineCompiler, PipelineHandle,
    PipelineSource, PoolAllocator, ProcessOutcome, ProgramRef, RecordingBackend, Renderer,
    RendererConfig, SurfaceFormat, TextureDescriptor, TextureFormat, ThreadId, ThreadRegistry,
    ThreadStatus, VecGuestMemory,
};

const SYNC_ADDR: u64 = 0x40;
const NOTIFY_ADDR: u64 = 0x80;
const SURFACE_ADDR: u64 = 0x1000;
const VERTEX_ADDR: u64 = 0x2000;
const FRAGMENT_ADDR: u64 = 0x2100;
const TEXTURE_ADDR: u64 = 0x3000;

struct Harness {
    memory: Arc<VecGuestMemory>,
    threads: Arc<ThreadRegistry>,
    renderer: Renderer,
    processor: BatchProcessor<RecordingBackend>,
    ctx: Arc<ExecutionContext>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn sync_config() -> RendererConfig {
    let mut config = RendererConfig::default();
    config.pipeline_cache.async_compile = false;
    config.processor.max_stall_ms = 50;
    config
}

fn harness_with(config: RendererConfig, compiler: Arc<dyn PipelineCompiler>) -> Harness {
    init_tracing();
    let memory = Arc::new(VecGuestMemory::new(0x10000));
    let threads = Arc::new(ThreadRegistry::new());
    let (renderer, processor) = Renderer::new(
        config,
        memory.clone(),
        threads.clone(),
        RecordingBackend::new().with_surface_fill(0xAB),
        compiler,
    )
    .unwrap();
    let ctx = renderer.create_context(AllocatorKind::Heap);
    Harness {
        memory,
        threads,
        renderer,
        processor,
        ctx,
    }
}

fn harness() -> Harness {
    harness_with(sync_config(), Arc::new(NullCompiler::new()))
}

impl Harness {
    fn list(&self) -> CommandListBuilder {
        self.renderer.command_list(&self.ctx)
    }

    fn submit(&self, builder: CommandListBuilder) {
        self.renderer.submit(builder.finish()).unwrap();
    }

    fn write_programs(&self) -> (ProgramRef, ProgramRef) {
        let words = [0x0800_0000_0000_0000u64, 0x0800_0000_0000_0001];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.memory.write(VERTEX_ADDR, &bytes).unwrap();
        self.memory.write(FRAGMENT_ADDR, &bytes[..8]).unwrap();
        (
            ProgramRef {
                addr: VERTEX_ADDR,
                word_count: 2,
            },
            ProgramRef {
                addr: FRAGMENT_ADDR,
                word_count: 1,
            },
        )
    }
}

fn surface() -> ColorSurface {
    ColorSurface {
        addr: SURFACE_ADDR,
        width: 2,
        height: 2,
        format: SurfaceFormat::Rgba8,
    }
}

#[test]
fn head_wait_blocks_until_signaled() {
    let mut h = harness();
    let object = h.memory.create_sync_object(SYNC_ADDR);
    object.promise(1);

    let mut list = h.list();
    list.wait_sync_object(SYNC_ADDR, 1).draw(0, 3, 1);
    h.submit(list);

    assert_eq!(h.processor.process_next(), ProcessOutcome::NotReady);
    assert_eq!(h.renderer.queue().len(), 1);
    assert_eq!(h.processor.backend().draws().count(), 0);

    let signaler = {
        let object = object.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            object.signal(1);
        })
    };
    let mut outcome = h.processor.process_next();
    // The signal may land after a full stall on a slow machine.
    while outcome == ProcessOutcome::NotReady {
        assert_eq!(h.processor.backend().draws().count(), 0);
        outcome = h.processor.process_next();
    }
    signaler.join().unwrap();

    assert_eq!(outcome, ProcessOutcome::Processed);
    assert!(h.renderer.queue().is_empty());
    assert_eq!(h.processor.backend().draws().count(), 1);
    assert!(h.renderer.stats().snapshot().stalls >= 1);
}

#[test]
fn satisfied_head_wait_runs_without_waiting() {
    let mut h = harness();
    let object = h.memory.create_sync_object(SYNC_ADDR);
    object.promise(3);
    object.signal(3);

    let mut list = h.list();
    list.wait_sync_object(SYNC_ADDR, 2).nop();
    h.submit(list);

    let started = Instant::now();
    assert_eq!(h.processor.process_next(), ProcessOutcome::Processed);
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(h.renderer.stats().snapshot().readiness_waits, 0);
}

#[test]
fn unknown_sync_object_at_head_does_not_block() {
    let mut h = harness();
    let mut list = h.list();
    list.wait_sync_object(0x9990, 5).draw(0, 3, 1);
    h.submit(list);
    assert_eq!(h.processor.process_next(), ProcessOutcome::Processed);
    assert_eq!(h.processor.backend().draws().count(), 1);
}

#[test]
fn unknown_and_truncated_commands_are_skipped() {
    let mut h = harness();
    let mut list = h.list();
    list.raw(0x7777, &[1, 2, 3])
        .raw(0x0005, &[0; 4])
        .draw(0, 3, 1);
    h.submit(list);

    assert_eq!(h.processor.process_next(), ProcessOutcome::Processed);
    let stats = h.renderer.stats().snapshot();
    assert_eq!(stats.commands_skipped, 2);
    assert_eq!(stats.commands_executed, 1);
    assert_eq!(stats.draws, 1);
}

#[test]
fn new_frame_stops_the_batch_loop() {
    let mut h = harness();
    let mut first = h.list();
    first.set_context(&surface()).draw(0, 3, 1);
    h.submit(first);
    let mut second = h.list();
    second.new_frame();
    h.submit(second);
    let mut third = h.list();
    third.draw(0, 3, 1);
    h.submit(third);

    assert_eq!(h.processor.process_batches(), 2);
    assert!(h.renderer.display().should_display());
    assert_eq!(h.renderer.queue().len(), 1);

    let frame = h.renderer.display().dump_frame().unwrap();
    assert_eq!((frame.width, frame.height), (2, 2));
    assert!(frame.rgba8.iter().all(|&b| b == 0xAB));

    // Still set: nothing runs until the display side consumes the frame.
    assert_eq!(h.processor.process_batches(), 0);
    assert!(h.renderer.display().take_should_display());
    assert_eq!(h.processor.process_batches(), 1);
    assert_eq!(h.processor.counters().frame, 1);
}

#[test]
fn executed_commands_return_to_their_pool() {
    let mut h = harness();
    let pool = Arc::new(PoolAllocator::new(64));
    let ctx = Arc::new(ExecutionContext::new(ContextId(99), pool.clone()));
    let mut list = CommandListBuilder::new(ctx);
    list.set_context(&surface()).draw(0, 3, 1).draw(0, 6, 1).new_frame();
    h.renderer.submit(list.finish()).unwrap();

    assert_eq!(pool.pooled(), 0);
    assert_eq!(h.processor.process_next(), ProcessOutcome::Processed);
    assert_eq!(pool.pooled(), 4);
}

#[test]
fn surface_data_is_written_back_to_guest_memory() {
    let mut h = harness();
    let mut list = h.list();
    list.set_context(&surface()).draw(0, 3, 1).sync_surface_data();
    h.submit(list);
    h.processor.process_next();

    let bytes = h.memory.to_vec(SURFACE_ADDR, surface().byte_len().unwrap()).unwrap();
    assert!(bytes.iter().all(|&b| b == 0xAB));
}

#[test]
fn notification_writes_value_and_wakes_the_thread() {
    let mut h = harness();
    let guest = h.threads.register(ThreadId(3));
    guest.suspend();

    let sleeper = {
        let guest = guest.clone();
        thread::spawn(move || guest.wait_until_runnable(Some(Duration::from_secs(5))))
    };
    let mut list = h.list();
    list.signal_notification(NOTIFY_ADDR, 42, ThreadId(3));
    h.submit(list);
    h.processor.process_next();

    assert!(sleeper.join().unwrap());
    assert_eq!(guest.status(), ThreadStatus::Runnable);
    assert_eq!(h.memory.read_u32(NOTIFY_ADDR).unwrap(), 42);
}

#[test]
fn textures_upload_only_when_content_changes() {
    let mut h = harness();
    let texture = TextureDescriptor {
        data_addr: TEXTURE_ADDR,
        palette_addr: 0,
        width: 8,
        height: 2,
        format: TextureFormat::Rgba8,
    };
    h.memory.write(TEXTURE_ADDR, &[0x11; 64]).unwrap();

    let mut list = h.list();
    list.bind_texture(2, &texture).draw(0, 3, 1).draw(0, 3, 1);
    h.submit(list);
    h.processor.process_next();
    assert_eq!(h.processor.backend().uploads(), 1);

    h.memory.write(TEXTURE_ADDR, &[0x22; 4]).unwrap();
    let mut list = h.list();
    list.draw(0, 3, 1);
    h.submit(list);
    h.processor.process_next();
    assert_eq!(h.processor.backend().uploads(), 2);

    let draw = h.processor.backend().draws().last().unwrap().clone();
    assert_eq!(draw.textures.len(), 1);
    assert_eq!(draw.textures[0].0, 2);
}

#[test]
fn oversized_resources_are_skipped_and_processing_continues() {
    let mut h = harness();
    let huge = TextureDescriptor {
        data_addr: TEXTURE_ADDR,
        palette_addr: 0,
        width: u32::MAX,
        height: u32::MAX,
        format: TextureFormat::Rgba16F,
    };
    let small = TextureDescriptor {
        width: 8,
        height: 2,
        format: TextureFormat::Rgba8,
        ..huge
    };
    let mut list = h.list();
    list.bind_texture(0, &huge)
        .bind_texture(1, &small)
        .draw(0, 3, 1)
        .set_context(&ColorSurface {
            width: u32::MAX,
            height: u32::MAX,
            ..surface()
        })
        .draw(0, 3, 1)
        .sync_surface_data();
    h.submit(list);

    assert_eq!(h.processor.process_next(), ProcessOutcome::Processed);
    let draws: Vec<_> = h.processor.backend().draws().cloned().collect();
    assert_eq!(draws.len(), 2);
    for draw in &draws {
        assert_eq!(draw.surface, None);
        assert_eq!(draw.textures.iter().map(|t| t.0).collect::<Vec<_>>(), vec![1]);
    }
    let stats = h.renderer.stats().snapshot();
    assert_eq!(stats.commands_skipped, 1);
    assert_eq!(stats.lists_processed, 1);
}

#[test]
fn draws_compile_programs_synchronously() {
    let mut h = harness();
    let (vertex, fragment) = h.write_programs();
    let mut list = h.list();
    list.set_programs(vertex, fragment).draw(0, 3, 1).draw(0, 3, 1);
    h.submit(list);
    h.processor.process_next();

    let pipelines: Vec<_> = h.processor.backend().draws().map(|d| d.pipeline).collect();
    assert_eq!(pipelines, vec![PipelineHandle(1), PipelineHandle(1)]);
    let stats = h.renderer.stats().snapshot();
    assert_eq!((stats.pipeline_misses, stats.pipeline_hits), (1, 1));
}

#[test]
fn async_pipeline_replaces_the_fallback_once_compiled() {
    let mut config = sync_config();
    config.pipeline_cache.async_compile = true;
    config.pipeline_cache.compiler_threads = 1;
    let mut h = harness_with(config, Arc::new(NullCompiler::new()));
    let (vertex, fragment) = h.write_programs();

    let mut list = h.list();
    list.set_programs(vertex, fragment);
    h.submit(list);
    h.processor.process_next();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let mut list = h.list();
        list.draw(0, 3, 1);
        h.submit(list);
        h.processor.process_next();
        let pipeline = h.processor.backend().draws().last().unwrap().pipeline;
        if pipeline != PipelineHandle(0) {
            assert_eq!(pipeline, PipelineHandle(1));
            break;
        }
        assert!(Instant::now() < deadline, "pipeline never became ready");
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(h.renderer.stats().snapshot().pipeline_compiles, 1);
}

struct RejectingCompiler;

impl PipelineCompiler for RejectingCompiler {
    fn compile(&self, _source: &PipelineSource) -> Result<PipelineHandle, CompileError> {
        Err(CompileError::Backend("unsupported".into()))
    }

    fn fallback(&self) -> PipelineHandle {
        PipelineHandle(0)
    }

    fn release(&self, _handle: PipelineHandle) {}
}

#[test]
fn compile_failure_is_reported_once_and_keeps_drawing() {
    let mut h = harness_with(sync_config(), Arc::new(RejectingCompiler));
    let (vertex, fragment) = h.write_programs();
    let mut list = h.list();
    list.set_programs(vertex, fragment);
    for _ in 0..4 {
        list.draw(0, 3, 1);
    }
    h.submit(list);
    h.processor.process_next();

    assert!(h
        .processor
        .backend()
        .draws()
        .all(|d| d.pipeline == PipelineHandle(0)));
    let stats = h.renderer.stats().snapshot();
    assert_eq!(stats.draws, 4);
    assert_eq!(stats.pipeline_compile_failures, 1);
    assert_eq!(stats.pipeline_fallbacks, 4);
}

#[test]
fn mid_list_wait_times_out_and_continues() {
    let mut h = harness();
    let object = h.memory.create_sync_object(SYNC_ADDR);
    object.promise(1);

    let mut list = h.list();
    list.draw(0, 3, 1).wait_sync_object(SYNC_ADDR, 1).draw(0, 3, 1);
    h.submit(list);
    assert_eq!(h.processor.process_next(), ProcessOutcome::Processed);

    assert_eq!(h.processor.backend().draws().count(), 2);
    assert_eq!(h.renderer.stats().snapshot().sync_wait_timeouts, 1);
    assert!(!h
        .processor
        .backend()
        .calls()
        .iter()
        .any(|call| matches!(call, BackendCall::Present(_))));
}
