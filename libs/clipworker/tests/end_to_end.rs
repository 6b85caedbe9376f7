// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Controller and real `clipworker-worker` processes, end to end.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clipworker::core::pattern::{PatternFrame, PatternProvider};
use clipworker::core::script::RegisteredProvider;
use clipworker::{
    find_provider, gather, Clip, Deferred, Frame, ManagerRegistry, ProxyClip, ProxyFrame,
    RawFormat, Script, ScriptProviderInfo, ScriptSource, Size, Subprocess, WorkerConfig,
    WorkerError, WorkerPool,
};

const TIMEOUT: Duration = Duration::from_secs(20);

fn config() -> WorkerConfig {
    WorkerConfig {
        worker_executable: Some(PathBuf::from(env!("CARGO_BIN_EXE_clipworker-worker"))),
        frame_buffer_size: 64 * 48 * 3,
        poll_interval_ms: 20,
        handshake_timeout_ms: 15_000,
        shutdown_timeout_ms: 1_000,
        ..Default::default()
    }
}

fn pattern() -> ScriptProviderInfo {
    find_provider(PatternProvider::PROVIDER_CLASS)
        .unwrap()
        .with_config(std::iter::empty::<(String, String)>())
}

fn pool() -> Arc<WorkerPool> {
    WorkerPool::new(config(), pattern()).unwrap()
}

fn wait<T: Clone + Send + 'static>(deferred: Deferred<T>) -> clipworker::Result<T> {
    deferred.join_timeout(TIMEOUT)
}

fn run(worker: &Subprocess, code: &str) -> clipworker::Result<Option<String>> {
    wait(worker.execute(ScriptSource::Code(code.into())))
}

fn lengths(worker: &Subprocess) -> BTreeMap<String, u32> {
    wait(worker.get_results())
        .unwrap()
        .iter()
        .map(|(name, clip)| (name.clone(), clip.len()))
        .collect()
}

fn proxy_clip(worker: &Arc<Subprocess>, name: &str) -> ProxyClip {
    let length = lengths(worker)[name];
    ProxyClip::new(name.to_string(), length, Arc::clone(worker))
}

#[test]
fn test_execute_and_list_outputs() {
    let pool = pool();
    let worker = pool.create("a", true).unwrap();
    assert!(worker.alive());

    assert_eq!(run(&worker, "x = 1+1").unwrap(), Some("2".into()));
    assert!(lengths(&worker).is_empty());

    run(&worker, "output 0 length=5").unwrap();
    assert_eq!(lengths(&worker), BTreeMap::from([("0".to_string(), 5)]));

    pool.disable();
    assert!(!worker.alive());
}

#[test]
fn test_script_errors_come_back_as_remote_errors() {
    let pool = pool();
    let worker = pool.create("a", true).unwrap();

    let err = run(&worker, "fail the render exploded").unwrap_err();
    assert_eq!(err.kind(), "script");
    assert!(err.to_string().contains("the render exploded"), "{}", err);
    assert!(!err.traceback().is_empty());

    // The worker keeps serving after a script error.
    assert_eq!(run(&worker, "y = 3").unwrap(), Some("3".into()));
}

#[test]
fn test_frame_meta_raw_and_image() {
    let pool = pool();
    let worker = pool.create("a", true).unwrap();
    run(&worker, "output 0 length=3\noutput g length=1 width=4 height=2 format=gray8").unwrap();

    let clip = proxy_clip(&worker, "0");
    let frame = clip.get(2).unwrap();
    assert_eq!(wait(frame.size()).unwrap(), Size::new(64, 48));
    assert_eq!(wait(frame.format()).unwrap(), RawFormat::RGB24);

    let raw = wait(ProxyFrame::to_raw(&frame)).unwrap();
    assert_eq!(raw.as_ref(), PatternFrame::render(2, Size::new(64, 48), RawFormat::RGB24));

    let gray = proxy_clip(&worker, "g").get(0).unwrap();
    let image = wait(gray.to_image()).unwrap();
    let rgb = image.as_rgb8().unwrap();
    assert_eq!((rgb.width(), rgb.height()), (4, 2));
    // Gray byte 5 of frame 0 is 5.
    assert_eq!(rgb.get_pixel(1, 1).0, [5, 5, 5]);

    assert!(matches!(
        clip.get(3),
        Err(WorkerError::IndexOutOfRange { index: 3, length: 3 })
    ));
}

#[test]
fn test_clip_does_not_pin_released_frames() {
    let pool = pool();
    let worker = pool.create("a", true).unwrap();
    run(&worker, "output 0 length=4").unwrap();
    let clip = proxy_clip(&worker, "0");

    let frame = clip.get(1).unwrap();
    assert!(frame.same_frame(&clip.get(1).unwrap()));
    let raw = wait(ProxyFrame::to_raw(&frame)).unwrap();
    assert_eq!(raw.len(), 64 * 48 * 3);

    let released = frame.downgrade();
    drop((frame, raw));
    assert!(released.upgrade().is_none());

    // A fresh frame for the same index fetches again.
    let again = clip.get(1).unwrap();
    assert_eq!(wait(ProxyFrame::to_raw(&again)).unwrap().len(), 64 * 48 * 3);
}

#[test]
fn test_frame_of_removed_output_is_not_found() {
    let pool = pool();
    let worker = pool.create("a", true).unwrap();
    run(&worker, "output 0 length=2").unwrap();
    let clip = proxy_clip(&worker, "0");

    run(&worker, "clear").unwrap();
    let err = wait(clip.get(1).unwrap().meta()).unwrap_err();
    assert_eq!(err.kind(), "frame_not_found");
    let err = wait(ProxyFrame::to_raw(&clip.get(0).unwrap())).unwrap_err();
    assert_eq!(err.kind(), "frame_not_found");
}

#[test]
fn test_concurrent_raw_transfers_do_not_cross() {
    let pool = pool();
    let worker = pool.create("a", true).unwrap();
    run(&worker, "output 0 length=50").unwrap();
    let clip = proxy_clip(&worker, "0");

    let pending: Vec<_> = (0..50)
        .map(|i| ProxyFrame::to_raw(&clip.get(i).unwrap()))
        .collect();
    let frames = gather(pending).join_timeout(TIMEOUT).unwrap();

    for (i, raw) in frames.iter().enumerate() {
        let expected = PatternFrame::render(i as u32, Size::new(64, 48), RawFormat::RGB24);
        assert_eq!(raw.as_ref(), expected.as_slice(), "frame {}", i);
    }
}

#[test]
fn test_concurrent_raw_transfers_from_many_threads() {
    let pool = pool();
    let worker = pool.create("a", true).unwrap();
    run(&worker, "output 0 length=8").unwrap();
    let clip = Arc::new(proxy_clip(&worker, "0"));

    let threads: Vec<_> = (0..8u32)
        .map(|i| {
            let clip = Arc::clone(&clip);
            std::thread::spawn(move || {
                let raw = wait(ProxyFrame::to_raw(&clip.get(i).unwrap())).unwrap();
                (i, raw)
            })
        })
        .collect();
    for thread in threads {
        let (i, raw) = thread.join().unwrap();
        assert_eq!(raw.as_ref(), PatternFrame::render(i, Size::new(64, 48), RawFormat::RGB24));
    }
}

#[test]
fn test_oversized_payload_travels_inline() {
    let config = WorkerConfig {
        inline_threshold: Some(100),
        ..config()
    };
    let pool = WorkerPool::new(config, pattern()).unwrap();
    let worker = pool.create("a", true).unwrap();
    // Larger than the whole shared buffer, too.
    run(&worker, "output big length=1 width=128 height=96").unwrap();
    run(&worker, "output small length=1 width=5 height=5 format=gray8").unwrap();

    let big = wait(ProxyFrame::to_raw(&proxy_clip(&worker, "big").get(0).unwrap())).unwrap();
    assert_eq!(big.as_ref(), PatternFrame::render(0, Size::new(128, 96), RawFormat::RGB24));
    let small = wait(ProxyFrame::to_raw(&proxy_clip(&worker, "small").get(0).unwrap())).unwrap();
    assert_eq!(small.as_ref(), PatternFrame::render(0, Size::new(5, 5), RawFormat::GRAY8));
}

#[test]
fn test_killed_worker_fails_outstanding_requests() {
    let pool = pool();
    let worker = pool.create("a", true).unwrap();

    let sleeping = worker.execute(ScriptSource::Code("sleep 10000".into()));
    std::thread::sleep(Duration::from_millis(200));
    // SAFETY: signalling our own child.
    assert_eq!(unsafe { libc::kill(worker.pid() as libc::pid_t, libc::SIGKILL) }, 0);

    let err = wait(sleeping).unwrap_err();
    assert_eq!(err.kind(), "worker_unavailable");
    assert!(!worker.alive());

    let err = run(&worker, "x = 1").unwrap_err();
    assert_eq!(err.kind(), "worker_unavailable");
}

#[test]
fn test_dead_core_is_distinct_and_recoverable() {
    let pool = pool();
    let worker = pool.create("a", true).unwrap();
    run(&worker, "kill").unwrap();

    let err = wait(worker.get_results()).err().unwrap();
    assert!(err.is_dead_core(), "{}", err);

    let fresh = pool.recreate("a", true).unwrap();
    assert_ne!(fresh.pid(), worker.pid());
    assert!(worker.is_disposed());
    assert_eq!(run(&fresh, "z = 4").unwrap(), Some("4".into()));
}

#[test]
fn test_pool_keeps_one_spare() {
    let pool = pool();
    assert!(pool.prewarmed());

    let a = pool.create("a", false).unwrap();
    assert!(pool.prewarmed());
    assert!(a.is_unstarted());
    a.initialize().unwrap();

    pool.create("b", true).unwrap();
    assert!(pool.prewarmed());
    assert_eq!(pool.names(), vec!["a".to_string(), "b".to_string()]);

    let err = pool.create("a", true).unwrap_err();
    assert_eq!(err.kind(), "already_exists");
}

#[test]
fn test_dispose_is_idempotent() {
    let pool = pool();
    let worker = pool.create("a", true).unwrap();

    worker.dispose();
    worker.dispose();
    assert!(worker.is_disposed());
    assert!(pool.get("a").is_none());

    pool.disable();
    pool.disable();
    assert!(!pool.prewarmed());
    assert_eq!(pool.create("b", true).unwrap_err().kind(), "already_disposed");
}

#[test]
fn test_dispose_fails_outstanding_requests() {
    let pool = pool();
    let worker = pool.create("a", true).unwrap();
    let sleeping = worker.execute(ScriptSource::Code("sleep 10000".into()));
    std::thread::sleep(Duration::from_millis(100));

    worker.dispose();
    assert_eq!(wait(sleeping).unwrap_err().kind(), "worker_unavailable");
}

#[test]
fn test_failed_boot_is_reported() {
    let info = ScriptProviderInfo {
        provider_class: "nope::engine".into(),
        extensions: Vec::new(),
        provider_params: BTreeMap::new(),
    };
    let pool = WorkerPool::new(config(), info).unwrap();
    let err = pool.create("a", true).unwrap_err();
    assert_eq!(err.kind(), "handshake");
    assert!(err.to_string().contains("nope::engine"), "{}", err);
    assert!(pool.get("a").is_none());

    let mut info = pattern();
    info.extensions.push("missing::extension".into());
    let pool = WorkerPool::new(config(), info).unwrap();
    assert_eq!(pool.create("a", true).unwrap_err().kind(), "handshake");
}

#[test]
fn test_worker_that_exits_fails_the_handshake() {
    let config = WorkerConfig {
        worker_executable: Some(PathBuf::from("/bin/false")),
        ..config()
    };
    let pool = WorkerPool::new(config, pattern()).unwrap();
    let err = pool.create("a", true).unwrap_err();
    assert_eq!(err.kind(), "handshake");
}

#[test]
fn test_extensions_feed_provider_constants() {
    let mut info = pattern();
    info.extensions.push("dims=clipworker::constants".into());
    let pool = WorkerPool::new(config(), info).unwrap();
    let worker = pool.create("a", true).unwrap();
    assert_eq!(run(&worker, "w = dims_width_hd").unwrap(), Some("1920".into()));
}

#[test]
fn test_registry_deinitializes_every_pool() {
    let registry = ManagerRegistry::new();
    registry.register("first", pool()).unwrap();
    registry.register("second", pool()).unwrap();
    assert_eq!(registry.register("first", pool()).unwrap_err().kind(), "already_exists");

    let a = registry.get("first").unwrap().create("a", true).unwrap();
    let b = registry.get("second").unwrap().create("b", true).unwrap();
    registry.deinitialize();
    assert!(a.is_disposed() && b.is_disposed());
    assert_eq!(registry.names(), vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn test_script_trait_objects_cover_workers() {
    let pool = pool();
    let worker: Arc<dyn Script> = pool.create("a", true).unwrap();
    wait(worker.execute(ScriptSource::Code("output 0 length=1".into()))).unwrap();

    let results = wait(worker.get_results()).unwrap();
    let frame: Arc<dyn Frame> = wait(results["0"].frame(0)).unwrap();
    assert_eq!(wait(frame.to_raw()).unwrap().len(), 64 * 48 * 3);
}
