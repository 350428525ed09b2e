//! Progressive sampling loop.
//!
//! Every pass is recorded into its own one-shot encoder, submitted, and
//! waited on before the next one starts, so passes run strictly in order and
//! each sees the accumulation written by its predecessor. Only the final pass
//! copies the result into host-readable memory.

use log::{debug, info};

use crate::config::{RenderConfig, WorkgroupSize, dispatch_grid};
use crate::error::{RenderError, RenderResult};
use crate::passes::{PushConstants, RaytracePass};
use crate::target::OutputTarget;
use crate::wgpu_ctx::WgpuContext;
use crate::wgpu_utils::{begin_one_shot, capture_device_errors, submit_and_wait};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Recording,
    /// Final pass only: the host-visibility copy is being recorded.
    Draining,
    Submitted,
}

impl PassState {
    fn can_enter(self, next: PassState) -> bool {
        matches!(
            (self, next),
            (PassState::Idle, PassState::Recording)
                | (PassState::Recording, PassState::Draining)
                | (PassState::Recording, PassState::Submitted)
                | (PassState::Draining, PassState::Submitted)
                | (PassState::Submitted, PassState::Idle)
        )
    }
}

/// Everything a single pass needs. Built fresh for every pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PassInfo {
    pub index: u32,
    pub push_constants: PushConstants,
    pub grid: [u32; 3],
    pub is_final: bool,
}

/// Executes passes on behalf of [`DispatchLoop`].
pub trait PassSubmitter {
    /// Starts a command recording and records the dispatch for `pass`.
    fn record(&mut self, pass: &PassInfo) -> RenderResult<()>;

    /// Records the hand-off of the output to host reads.
    fn record_host_visibility(&mut self) -> RenderResult<()>;

    /// Submits the current recording, blocks until it finished and frees it.
    fn submit_and_wait(&mut self) -> RenderResult<()>;
}

pub struct DispatchLoop {
    width: u32,
    height: u32,
    sample_batches: u32,
    workgroup: WorkgroupSize,
    state: PassState,
    completed: u32,
}

impl DispatchLoop {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            sample_batches: config.sample_batches,
            workgroup: config.workgroup,
            state: PassState::Idle,
            completed: 0,
        }
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn pass_info(&self, index: u32) -> PassInfo {
        PassInfo {
            index,
            push_constants: PushConstants::new(self.width, self.height, index),
            grid: dispatch_grid(self.width, self.height, self.workgroup),
            is_final: index + 1 == self.sample_batches,
        }
    }

    fn enter(&mut self, next: PassState) -> RenderResult<()> {
        if !self.state.can_enter(next) {
            return Err(RenderError::submission(format!(
                "illegal pass transition {:?} -> {:?}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Runs all passes in order. The first failure aborts the loop; the
    /// partially accumulated output must then be discarded.
    pub fn run<S: PassSubmitter>(&mut self, submitter: &mut S) -> RenderResult<u32> {
        if self.completed == self.sample_batches && self.completed > 0 {
            return Err(RenderError::submission("all sample batches were already rendered"));
        }

        for index in 0..self.sample_batches {
            let pass = self.pass_info(index);
            debug!("Pass {}: grid {:?}", index, pass.grid);

            self.enter(PassState::Recording)?;
            submitter.record(&pass)?;
            if pass.is_final {
                self.enter(PassState::Draining)?;
                submitter.record_host_visibility()?;
            }
            submitter.submit_and_wait()?;
            self.enter(PassState::Submitted)?;
            self.enter(PassState::Idle)?;

            self.completed += 1;
            info!("Rendered sample batch index {}.", index);
        }
        Ok(self.completed)
    }
}

/// Records passes into wgpu command encoders.
pub struct GpuPassSubmitter<'a> {
    ctx: &'a WgpuContext,
    pass: &'a RaytracePass,
    target: &'a OutputTarget,
    encoder: Option<wgpu::CommandEncoder>,
}

impl<'a> GpuPassSubmitter<'a> {
    pub fn new(ctx: &'a WgpuContext, pass: &'a RaytracePass, target: &'a OutputTarget) -> Self {
        Self {
            ctx,
            pass,
            target,
            encoder: None,
        }
    }

    fn encoder(&mut self) -> RenderResult<&mut wgpu::CommandEncoder> {
        self.encoder
            .as_mut()
            .ok_or_else(|| RenderError::submission("no command recording is open"))
    }
}

impl PassSubmitter for GpuPassSubmitter<'_> {
    fn record(&mut self, pass: &PassInfo) -> RenderResult<()> {
        let mut encoder = begin_one_shot(&self.ctx.device, "Sample Batch");
        self.pass.execute(&mut encoder, &pass.push_constants, pass.grid)?;
        self.encoder = Some(encoder);
        Ok(())
    }

    fn record_host_visibility(&mut self) -> RenderResult<()> {
        let target = self.target;
        target.encode_host_visibility(self.encoder()?);
        Ok(())
    }

    fn submit_and_wait(&mut self) -> RenderResult<()> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| RenderError::submission("no command recording to submit"))?;
        let ctx = self.ctx;
        capture_device_errors(&ctx.device, RenderError::Submission, || {
            submit_and_wait(&ctx.device, &ctx.queue, encoder)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Event {
        Record(PassInfo),
        HostVisibility,
        Submit,
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
        fail_submit_at: Option<u32>,
        submits: u32,
    }

    impl PassSubmitter for Recorder {
        fn record(&mut self, pass: &PassInfo) -> RenderResult<()> {
            self.events.push(Event::Record(*pass));
            Ok(())
        }

        fn record_host_visibility(&mut self) -> RenderResult<()> {
            self.events.push(Event::HostVisibility);
            Ok(())
        }

        fn submit_and_wait(&mut self) -> RenderResult<()> {
            if self.fail_submit_at == Some(self.submits) {
                return Err(RenderError::submission("device lost"));
            }
            self.submits += 1;
            self.events.push(Event::Submit);
            Ok(())
        }
    }

    fn recorded_passes(recorder: &Recorder) -> Vec<PassInfo> {
        recorder
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Record(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn pass_indices_are_consecutive() {
        let config = RenderConfig::default();
        let mut dispatch = DispatchLoop::new(&config);
        let mut recorder = Recorder::default();

        assert_eq!(dispatch.run(&mut recorder).unwrap(), 32);

        let indices: Vec<u32> = recorded_passes(&recorder)
            .iter()
            .map(|p| p.push_constants.sample_batch)
            .collect();
        assert_eq!(indices, (0..32).collect::<Vec<_>>());
        assert_eq!(dispatch.state(), PassState::Idle);
    }

    #[test]
    fn only_the_last_pass_drains() {
        let config = RenderConfig::new(64, 64).sample_batches(3);
        let mut recorder = Recorder::default();
        DispatchLoop::new(&config).run(&mut recorder).unwrap();

        let passes = recorded_passes(&recorder);
        assert_eq!(
            passes.iter().map(|p| p.is_final).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        // Record then submit per pass; the copy sits between the last record and submit.
        assert!(matches!(recorder.events[0], Event::Record(_)));
        assert_eq!(recorder.events[1], Event::Submit);
        assert!(matches!(recorder.events[4], Event::Record(_)));
        assert_eq!(recorder.events[5], Event::HostVisibility);
        assert_eq!(recorder.events[6], Event::Submit);
        assert_eq!(recorder.events.len(), 7);
    }

    #[test]
    fn every_pass_carries_resolution_and_grid() {
        let config = RenderConfig::new(800, 600).sample_batches(2);
        let mut recorder = Recorder::default();
        DispatchLoop::new(&config).run(&mut recorder).unwrap();

        for pass in recorded_passes(&recorder) {
            assert_eq!(pass.grid, [50, 75, 1]);
            assert_eq!(pass.push_constants.render_width, 800);
            assert_eq!(pass.push_constants.render_height, 600);
        }
    }

    #[test]
    fn single_pass_is_also_final() {
        let config = RenderConfig::new(16, 8).sample_batches(1);
        let mut recorder = Recorder::default();
        DispatchLoop::new(&config).run(&mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec![
                Event::Record(PassInfo {
                    index: 0,
                    push_constants: PushConstants::new(16, 8, 0),
                    grid: [1, 1, 1],
                    is_final: true,
                }),
                Event::HostVisibility,
                Event::Submit,
            ]
        );
    }

    #[test]
    fn submission_failure_aborts_remaining_passes() {
        let config = RenderConfig::default().sample_batches(8);
        let mut dispatch = DispatchLoop::new(&config);
        let mut recorder = Recorder {
            fail_submit_at: Some(3),
            ..Default::default()
        };

        let err = dispatch.run(&mut recorder).unwrap_err();
        assert!(matches!(err, RenderError::Submission(_)));
        assert_eq!(dispatch.completed(), 3);
        assert_eq!(recorded_passes(&recorder).len(), 4);
        assert!(!recorder.events.contains(&Event::HostVisibility));
    }

    #[test]
    fn loop_cannot_be_replayed() {
        let config = RenderConfig::new(16, 8).sample_batches(2);
        let mut dispatch = DispatchLoop::new(&config);
        dispatch.run(&mut Recorder::default()).unwrap();
        assert!(dispatch.run(&mut Recorder::default()).is_err());
    }

    #[test]
    fn transitions_follow_the_pass_cycle() {
        use PassState::*;
        assert!(Idle.can_enter(Recording));
        assert!(Recording.can_enter(Submitted));
        assert!(Recording.can_enter(Draining));
        assert!(Draining.can_enter(Submitted));
        assert!(Submitted.can_enter(Idle));

        assert!(!Idle.can_enter(Submitted));
        assert!(!Submitted.can_enter(Recording));
        assert!(!Draining.can_enter(Idle));
    }
}
