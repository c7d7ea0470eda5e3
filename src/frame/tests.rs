// Frame loop scenarios against a scripted driver

use super::*;
use ash::vk;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Wait(usize),
    Acquire(usize),
    Prepare(u32),
    Submit(usize, u32),
    Present(usize, u32),
    WaitIdle,
    Rebuild(SurfaceSize),
}

#[derive(Debug, Clone, Copy)]
enum Acquire {
    Image(u32),
    Suboptimal(u32),
    OutOfDate,
    Fail(vk::Result),
}

#[derive(Debug, Clone, Copy)]
enum Present {
    Suboptimal,
    OutOfDate,
    Fail(vk::Result),
}

/// Pretends to be a driver whose swapchain length depends on the surface size
struct ScriptedDriver {
    images: usize,
    recorded: usize,
    next_image: u32,
    acquires: VecDeque<Acquire>,
    presents: VecDeque<Present>,
    calls: Vec<Call>,
    fail_rebuild: bool,
    drop_one_recording: bool,
    zero_surface: bool,
    fail_submit: Option<vk::Result>,
    fail_wait: Option<vk::Result>,
}

fn images_for(size: SurfaceSize) -> usize {
    if size.width * size.height >= 800 * 600 {
        3
    } else {
        2
    }
}

impl ScriptedDriver {
    fn built_for(size: SurfaceSize) -> Self {
        let images = images_for(size);
        Self {
            images,
            recorded: images,
            next_image: 0,
            acquires: VecDeque::new(),
            presents: VecDeque::new(),
            calls: Vec::new(),
            fail_rebuild: false,
            drop_one_recording: false,
            zero_surface: false,
            fail_submit: None,
            fail_wait: None,
        }
    }

    fn position(&self, call: Call) -> usize {
        self.calls
            .iter()
            .position(|&c| c == call)
            .unwrap_or_else(|| panic!("{:?} never happened in {:?}", call, self.calls))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

impl PresentTarget for ScriptedDriver {
    fn image_count(&self) -> usize {
        self.images
    }

    fn recorded_count(&self) -> usize {
        self.recorded
    }

    fn wait_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        self.calls.push(Call::Wait(slot));
        match self.fail_wait {
            Some(code) => Err(FrameError::Sync(code)),
            None => Ok(()),
        }
    }

    fn acquire(&mut self, slot: usize) -> Result<Status<u32>, FrameError> {
        self.calls.push(Call::Acquire(slot));
        match self.acquires.pop_front() {
            Some(Acquire::Image(image)) => Ok(Status::Success(image)),
            Some(Acquire::Suboptimal(image)) => Ok(Status::Suboptimal(image)),
            Some(Acquire::OutOfDate) => Ok(Status::OutOfDate),
            Some(Acquire::Fail(code)) => Err(FrameError::Acquire(code)),
            None => {
                let image = self.next_image % self.images as u32;
                self.next_image += 1;
                Ok(Status::Success(image))
            }
        }
    }

    fn prepare(&mut self, image: u32) -> Result<(), FrameError> {
        assert!((image as usize) < self.images, "image {} out of range", image);
        self.calls.push(Call::Prepare(image));
        Ok(())
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<(), FrameError> {
        self.calls.push(Call::Submit(slot, image));
        match self.fail_submit {
            Some(code) => Err(FrameError::Submit(code)),
            None => Ok(()),
        }
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Status<()>, FrameError> {
        self.calls.push(Call::Present(slot, image));
        match self.presents.pop_front() {
            Some(Present::Suboptimal) => Ok(Status::Suboptimal(())),
            Some(Present::OutOfDate) => Ok(Status::OutOfDate),
            Some(Present::Fail(code)) => Err(FrameError::Present(code)),
            None => Ok(Status::Success(())),
        }
    }

    fn wait_idle(&mut self) -> Result<(), FrameError> {
        self.calls.push(Call::WaitIdle);
        Ok(())
    }

    fn rebuild(&mut self, size: SurfaceSize) -> Result<bool, FrameError> {
        self.calls.push(Call::Rebuild(size));
        if self.fail_rebuild {
            return Err(FrameError::Rebuild(anyhow::anyhow!("out of device memory")));
        }
        if self.zero_surface {
            return Ok(false);
        }
        self.images = images_for(size);
        self.recorded = if self.drop_one_recording {
            self.images - 1
        } else {
            self.images
        };
        self.next_image = 0;
        Ok(true)
    }
}

const WINDOW: SurfaceSize = SurfaceSize::new(800, 600);

fn frame_loop(frames_in_flight: usize) -> FrameLoop<ScriptedDriver> {
    FrameLoop::new(ScriptedDriver::built_for(WINDOW), WINDOW, frames_in_flight)
}

#[test]
fn steady_state_acquire_submit_present() {
    let mut frames = frame_loop(2);

    assert_eq!(frames.tick().unwrap(), FrameOutcome::Presented { image: 0 });
    assert_eq!(frames.tick().unwrap(), FrameOutcome::Presented { image: 1 });

    assert_eq!(
        frames.target().calls,
        vec![
            Call::Wait(0),
            Call::Acquire(0),
            Call::Prepare(0),
            Call::Submit(0, 0),
            Call::Present(0, 0),
            Call::Wait(1),
            Call::Acquire(1),
            Call::Prepare(1),
            Call::Submit(1, 1),
            Call::Present(1, 1),
        ]
    );
    assert_eq!(frames.phase(), Phase::Idle);
    assert_eq!(frames.frames_presented(), 2);
    assert_eq!(frames.recreations(), 0);
}

#[test]
fn single_slot_ring_reuses_slot_every_frame() {
    let mut frames = frame_loop(1);
    for _ in 0..4 {
        frames.tick().unwrap();
    }
    let driver = frames.target();
    assert_eq!(driver.count(|c| matches!(c, Call::Acquire(0))), 4);
    assert_eq!(driver.count(|c| matches!(c, Call::Wait(s) if *s != 0)), 0);
}

#[test]
fn out_of_date_acquire_never_reaches_submit() {
    let mut frames = frame_loop(2);
    frames.target_mut().acquires.push_back(Acquire::OutOfDate);

    assert_eq!(frames.tick().unwrap(), FrameOutcome::Skipped);

    let driver = frames.target();
    assert_eq!(driver.count(|c| matches!(c, Call::Submit(..))), 0);
    assert_eq!(driver.count(|c| matches!(c, Call::Present(..))), 0);
    assert_eq!(driver.count(|c| matches!(c, Call::Rebuild(_))), 1);
    assert!(driver.position(Call::WaitIdle) < driver.position(Call::Rebuild(WINDOW)));
    assert_eq!(frames.recreations(), 1);
    assert!(!frames.is_stale());

    // Next tick renders normally
    assert!(matches!(frames.tick().unwrap(), FrameOutcome::Presented { .. }));
}

#[test]
fn suboptimal_acquire_still_renders_then_recreates() {
    let mut frames = frame_loop(2);
    frames.target_mut().acquires.push_back(Acquire::Suboptimal(2));

    assert_eq!(frames.tick().unwrap(), FrameOutcome::Presented { image: 2 });

    let driver = frames.target();
    let submit = driver.position(Call::Submit(0, 2));
    let present = driver.position(Call::Present(0, 2));
    let rebuild = driver.position(Call::Rebuild(WINDOW));
    assert!(submit < present && present < rebuild);
    assert_eq!(frames.recreations(), 1);
}

#[test]
fn suboptimal_present_completes_frame_before_recreation() {
    let mut frames = frame_loop(2);
    frames.target_mut().presents.push_back(Present::Suboptimal);

    assert_eq!(frames.tick().unwrap(), FrameOutcome::Presented { image: 0 });

    let driver = frames.target();
    assert!(driver.position(Call::Submit(0, 0)) < driver.position(Call::Present(0, 0)));
    assert!(driver.position(Call::Present(0, 0)) < driver.position(Call::Rebuild(WINDOW)));
    assert_eq!(frames.frames_presented(), 1);
    assert_eq!(frames.recreations(), 1);
}

#[test]
fn out_of_date_present_is_not_an_error() {
    let mut frames = frame_loop(2);
    frames.target_mut().presents.push_back(Present::OutOfDate);

    assert!(frames.tick().is_ok());
    assert_eq!(frames.recreations(), 1);
}

#[test]
fn unexpected_acquire_failure_is_fatal() {
    let mut frames = frame_loop(2);
    frames
        .target_mut()
        .acquires
        .push_back(Acquire::Fail(vk::Result::ERROR_DEVICE_LOST));

    let err = frames.tick().unwrap_err();
    assert!(matches!(err, FrameError::Acquire(vk::Result::ERROR_DEVICE_LOST)));
    assert_eq!(frames.phase(), Phase::Acquiring);
    assert_eq!(frames.target().count(|c| matches!(c, Call::Submit(..))), 0);
    assert_eq!(frames.recreations(), 0);
}

#[test]
fn unexpected_present_failure_is_fatal() {
    let mut frames = frame_loop(2);
    frames
        .target_mut()
        .presents
        .push_back(Present::Fail(vk::Result::ERROR_SURFACE_LOST_KHR));

    let err = frames.tick().unwrap_err();
    assert!(matches!(
        err,
        FrameError::Present(vk::Result::ERROR_SURFACE_LOST_KHR)
    ));
    assert_eq!(frames.phase(), Phase::Presenting);
    assert_eq!(frames.recreations(), 0);
}

#[test]
fn image_owned_by_other_slot_is_waited_on() {
    let mut frames = frame_loop(2);
    frames.target_mut().acquires.extend([Acquire::Image(1), Acquire::Image(1)]);

    frames.tick().unwrap();
    frames.tick().unwrap();

    // Slot 1 got image 1 back while slot 0 may still be rendering into it
    let calls = &frames.target().calls[5..];
    assert_eq!(
        calls,
        &[
            Call::Wait(1),
            Call::Acquire(1),
            Call::Wait(0),
            Call::Prepare(1),
            Call::Submit(1, 1),
            Call::Present(1, 1),
        ]
    );
}

#[test]
fn resize_rebuilds_with_consistent_counts() {
    let mut frames = frame_loop(2);
    assert_eq!(frames.target().image_count(), 3);
    frames.tick().unwrap();

    frames.resize(SurfaceSize::new(400, 300));
    assert!(frames.is_stale());
    frames.tick().unwrap();

    assert_eq!(frames.recreations(), 1);
    assert_eq!(frames.target().image_count(), 2);
    assert_eq!(frames.target().recorded_count(), 2);

    for _ in 0..6 {
        match frames.tick().unwrap() {
            FrameOutcome::Presented { image } => assert!(image < 2),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(frames.recreations(), 1);
}

#[test]
fn repeated_identical_resizes_recreate_once() {
    let mut frames = frame_loop(2);
    for _ in 0..5 {
        frames.resize(WINDOW);
    }
    frames.tick().unwrap();
    assert_eq!(frames.recreations(), 1);

    let before = (frames.target().image_count(), frames.target().recorded_count());
    frames.resize(WINDOW);
    frames.tick().unwrap();
    let after = (frames.target().image_count(), frames.target().recorded_count());

    assert_eq!(frames.recreations(), 2);
    assert_eq!(before, after);
}

#[test]
fn minimize_defers_then_restore_recreates_exactly_once() {
    let mut frames = frame_loop(2);
    frames.tick().unwrap();
    let calls_before = frames.target().calls.len();

    frames.resize(SurfaceSize::new(0, 0));
    for _ in 0..10 {
        assert_eq!(frames.tick().unwrap(), FrameOutcome::Deferred);
    }
    assert!(frames.is_deferred());
    assert_eq!(frames.target().calls.len(), calls_before);
    assert_eq!(frames.recreations(), 0);

    frames.resize(SurfaceSize::new(800, 600));
    assert!(matches!(frames.tick().unwrap(), FrameOutcome::Presented { .. }));
    frames.tick().unwrap();
    frames.tick().unwrap();

    assert_eq!(frames.recreations(), 1);
    assert_eq!(
        frames.target().count(|c| matches!(c, Call::Rebuild(_))),
        1
    );
}

#[test]
fn staleness_while_minimized_waits_for_real_size() {
    let mut frames = frame_loop(2);
    frames.resize(SurfaceSize::new(1024, 768));
    frames.resize(SurfaceSize::new(0, 0));

    assert_eq!(frames.tick().unwrap(), FrameOutcome::Deferred);
    assert!(!frames.recreate().unwrap());
    assert!(frames.is_stale());
    assert_eq!(frames.target().count(|c| matches!(c, Call::WaitIdle)), 0);

    frames.resize(SurfaceSize::new(1024, 768));
    frames.tick().unwrap();
    assert_eq!(frames.recreations(), 1);
    assert_eq!(
        frames.target().count(|c| matches!(c, Call::Rebuild(s) if *s == SurfaceSize::new(1024, 768))),
        1
    );
}

#[test]
fn any_resize_sequence_keeps_recordings_matched() {
    let sequences: &[&[(u32, u32)]] = &[
        &[(400, 300)],
        &[(0, 0), (800, 600)],
        &[(1920, 1080), (0, 0), (0, 0), (640, 480)],
        &[(800, 600), (800, 600), (100, 100)],
        &[(0, 600), (1280, 0), (1280, 720)],
        &[(300, 200), (3000, 2000), (1, 1)],
    ];

    for sequence in sequences {
        let mut frames = frame_loop(3);
        for &(w, h) in sequence.iter() {
            frames.resize(SurfaceSize::new(w, h));
            frames.tick().unwrap();
            frames.tick().unwrap();

            let driver = frames.target();
            if !frames.is_deferred() {
                assert!(!frames.is_stale());
                assert_eq!(driver.recorded_count(), driver.image_count());
                assert_eq!(driver.image_count(), images_for(SurfaceSize::new(w, h)));
            }
        }
    }
}

#[test]
fn recording_mismatch_is_reported() {
    let mut frames = frame_loop(2);
    frames.target_mut().drop_one_recording = true;
    frames.resize(SurfaceSize::new(400, 300));

    match frames.tick() {
        Err(FrameError::Invariant { recorded, images }) => {
            assert_eq!((recorded, images), (1, 2));
        }
        other => panic!("expected invariant error, got {:?}", other),
    }
    assert_eq!(frames.phase(), Phase::Recreating);
    assert_eq!(frames.recreations(), 0);
}

#[test]
fn rebuild_failure_is_fatal() {
    let mut frames = frame_loop(2);
    frames.target_mut().fail_rebuild = true;
    frames.resize(SurfaceSize::new(400, 300));

    let err = frames.tick().unwrap_err();
    assert!(matches!(err, FrameError::Rebuild(_)));
    assert!(err.to_string().contains("out of device memory"));
    assert_eq!(frames.phase(), Phase::Recreating);
    assert_eq!(frames.target().count(|c| matches!(c, Call::Submit(..))), 0);
}

#[test]
fn submit_failure_is_fatal() {
    let mut frames = frame_loop(2);
    frames.tick().unwrap();
    frames.target_mut().fail_submit = Some(vk::Result::ERROR_DEVICE_LOST);

    let err = frames.tick().unwrap_err();
    assert!(matches!(err, FrameError::Submit(vk::Result::ERROR_DEVICE_LOST)));
    assert_eq!(frames.phase(), Phase::Submitting);
    assert_eq!(frames.frames_presented(), 1);

    // Only the first frame ever reached present
    let driver = frames.target();
    assert_eq!(driver.count(|c| matches!(c, Call::Present(..))), 1);
    assert_eq!(driver.calls.last(), Some(&Call::Submit(1, 1)));
}

#[test]
fn slot_wait_failure_is_fatal() {
    let mut frames = frame_loop(2);
    frames.target_mut().fail_wait = Some(vk::Result::ERROR_DEVICE_LOST);

    let err = frames.tick().unwrap_err();
    assert!(matches!(err, FrameError::Sync(vk::Result::ERROR_DEVICE_LOST)));
    assert_eq!(frames.phase(), Phase::Acquiring);
    assert_eq!(frames.target().calls, vec![Call::Wait(0)]);
    assert_eq!(frames.frames_presented(), 0);
}

#[test]
fn zero_area_surface_defers_until_it_grows_back() {
    let mut frames = frame_loop(2);

    // Minimized, but the window has not reported its new size yet
    frames.target_mut().zero_surface = true;
    frames.target_mut().presents.push_back(Present::OutOfDate);

    assert_eq!(frames.tick().unwrap(), FrameOutcome::Presented { image: 0 });
    assert!(frames.is_stale());
    assert_eq!(frames.recreations(), 0);
    assert_eq!(frames.phase(), Phase::Idle);

    for _ in 0..3 {
        assert_eq!(frames.tick().unwrap(), FrameOutcome::Deferred);
    }
    let driver = frames.target();
    assert_eq!(driver.count(|c| matches!(c, Call::Acquire(_))), 1);
    assert_eq!(driver.count(|c| matches!(c, Call::Submit(..))), 1);
    assert_eq!(driver.image_count(), 3);
    assert!(frames.is_stale());

    frames.target_mut().zero_surface = false;
    assert!(matches!(frames.tick().unwrap(), FrameOutcome::Presented { .. }));
    assert!(!frames.is_stale());
    assert_eq!(frames.recreations(), 1);
}

#[test]
fn out_of_date_acquire_on_zero_area_surface_is_deferred() {
    let mut frames = frame_loop(2);
    frames.target_mut().zero_surface = true;
    frames.target_mut().acquires.push_back(Acquire::OutOfDate);

    assert_eq!(frames.tick().unwrap(), FrameOutcome::Deferred);
    assert!(frames.is_stale());
    assert_eq!(frames.recreations(), 0);
    assert_eq!(frames.target().count(|c| matches!(c, Call::Submit(..))), 0);
}
