use std::path::PathBuf;

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use thiserror::Error;

use crate::detection::domain::hand_detector::HandDetector;
use crate::detection::domain::nearest_tracker::NearestTracker;
use crate::detection::infrastructure::cascade_detector::CascadeDetector;
use crate::marking::domain::frame_marker::FrameMarker;
use crate::marking::infrastructure::circle_marker::CircleMarker;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::constants::GESTURE_FIST;
use crate::shared::frame::{Frame, FrameGeometry, GrayFrame, NegotiateError};

use super::config::StageConfig;
use super::events::{DetectionEvent, StreamEvent};

/// Whether a gesture profile is loaded on this stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelState {
    /// No load has been attempted yet.
    Uninitialized,
    Loaded,
    /// The last load failed; frames pass through until a profile loads.
    Absent,
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("no frame geometry negotiated before processing")]
    NotNegotiated,
    #[error("frame geometry {actual} does not match negotiated {expected}")]
    GeometryMismatch {
        expected: FrameGeometry,
        actual: FrameGeometry,
    },
}

/// Per-frame gesture detection, tracking and marking.
///
/// Wires a detector, a tracker and a marker into a single pipeline stage:
/// each frame is converted to grayscale, scanned for candidate regions,
/// narrowed to one tracked region, published on the event channel and,
/// when display is on, marked in place. The stage owns all per-stream
/// buffers; `negotiate` must run before the first frame and again on
/// every geometry change.
pub struct DetectionStage {
    config: StageConfig,
    detector: Box<dyn HandDetector>,
    marker: Box<dyn FrameMarker>,
    tracker: NearestTracker,
    gray: GrayFrame,
    geometry: Option<FrameGeometry>,
    model_state: ModelState,
    events: Sender<DetectionEvent>,
}

impl DetectionStage {
    pub fn new(config: StageConfig, events: Sender<DetectionEvent>) -> Self {
        Self::with_components(
            config,
            Box::new(CascadeDetector::new()),
            Box::new(CircleMarker::new()),
            events,
        )
    }

    pub fn with_components(
        config: StageConfig,
        detector: Box<dyn HandDetector>,
        marker: Box<dyn FrameMarker>,
        events: Sender<DetectionEvent>,
    ) -> Self {
        let mut stage = Self {
            config,
            detector,
            marker,
            tracker: NearestTracker::new(),
            gray: GrayFrame::new(),
            geometry: None,
            model_state: ModelState::Uninitialized,
            events,
        };
        stage.reload_model();
        stage
    }

    /// Allocates the per-stream buffers for the given frame geometry.
    /// Runs on stream start and again whenever the geometry changes.
    pub fn negotiate(&mut self, geometry: FrameGeometry) -> Result<(), NegotiateError> {
        self.gray.negotiate(geometry)?;
        self.detector.negotiate(geometry)?;
        debug!("negotiated frame geometry {geometry}");
        self.geometry = Some(geometry);
        Ok(())
    }

    /// Runs detection on one frame and marks it in place when display is on.
    ///
    /// Without a loaded profile the frame passes through untouched and no
    /// event is emitted. With a profile, frames whose candidates all sit
    /// too far from the tracked region still report the previous region.
    pub fn process_frame(&mut self, frame: &mut Frame) -> Result<(), StageError> {
        let expected = self.geometry.ok_or(StageError::NotNegotiated)?;
        let actual = frame.geometry();
        if actual != expected {
            return Err(StageError::GeometryMismatch { expected, actual });
        }
        if !self.detector.has_model() {
            return Ok(());
        }

        self.gray.convert_from(frame);
        let candidates = self.detector.detect(&self.gray);
        if !candidates.is_empty() {
            debug!("{} hand candidates", candidates.len());
        }

        let Some(reported) = self.tracker.update(&candidates) else {
            return Ok(());
        };

        let event = DetectionEvent::for_region(GESTURE_FIST, &reported);
        if self.events.send(event).is_err() {
            debug!("detection event dropped: no receiver");
        }
        if self.config.display {
            self.marker.mark(frame, &reported);
        }
        Ok(())
    }

    /// Stream lifecycle marks pass through unchanged. The tracker keeps
    /// its region across segment starts and flushes, so a gesture held
    /// through a seek is picked up again on the next frame.
    pub fn handle_event(&self, event: StreamEvent) -> StreamEvent {
        event
    }

    /// Replaces the whole configuration, reloading the profile only when
    /// its path changed.
    pub fn apply_config(&mut self, config: StageConfig) {
        let profile_changed = config.profile != self.config.profile;
        self.config = config;
        if profile_changed {
            self.reload_model();
        }
    }

    /// Points the stage at a new profile and reloads it immediately.
    pub fn set_profile(&mut self, profile: impl Into<PathBuf>) {
        self.config.profile = profile.into();
        self.reload_model();
    }

    pub fn set_display(&mut self, display: bool) {
        self.config.display = display;
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn model_state(&self) -> ModelState {
        self.model_state
    }

    /// The most recently reported region, or the zero rectangle before
    /// any frame had candidates.
    pub fn tracked(&self) -> BoundingBox {
        self.tracker.current()
    }

    fn reload_model(&mut self) {
        match self.detector.load_profile(&self.config.profile) {
            Ok(()) => {
                info!("loaded gesture profile {}", self.config.profile.display());
                self.model_state = ModelState::Loaded;
            }
            Err(error) => {
                warn!(
                    "could not load gesture profile {}: {error}",
                    self.config.profile.display()
                );
                self.model_state = ModelState::Absent;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::frame::FRAME_CHANNELS;
    use crossbeam_channel::Receiver;
    use std::collections::VecDeque;
    use std::error::Error;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    // --- Stubs ---

    struct ScriptedDetector {
        script: VecDeque<Vec<BoundingBox>>,
        model: bool,
        fail_on: Option<PathBuf>,
        loads: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl ScriptedDetector {
        fn new(script: Vec<Vec<BoundingBox>>) -> Self {
            Self {
                script: script.into(),
                model: false,
                fail_on: None,
                loads: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl HandDetector for ScriptedDetector {
        fn negotiate(&mut self, _geometry: FrameGeometry) -> Result<(), NegotiateError> {
            Ok(())
        }

        fn load_profile(&mut self, path: &Path) -> Result<(), Box<dyn Error>> {
            self.loads.lock().unwrap().push(path.to_path_buf());
            if self.fail_on.as_deref() == Some(path) {
                self.model = false;
                return Err("scripted load failure".into());
            }
            self.model = true;
            Ok(())
        }

        fn has_model(&self) -> bool {
            self.model
        }

        fn detect(&mut self, _gray: &GrayFrame) -> Vec<BoundingBox> {
            self.script.pop_front().unwrap_or_default()
        }
    }

    // --- Helpers ---

    const WIDTH: u32 = 64;
    const HEIGHT: u32 = 48;

    fn frame() -> Frame {
        Frame::new(
            vec![10; (WIDTH * HEIGHT) as usize * FRAME_CHANNELS],
            WIDTH,
            HEIGHT,
        )
    }

    fn scripted_stage(
        script: Vec<Vec<BoundingBox>>,
    ) -> (DetectionStage, Receiver<DetectionEvent>) {
        let (events, receiver) = crossbeam_channel::unbounded();
        let mut stage = DetectionStage::with_components(
            StageConfig::default(),
            Box::new(ScriptedDetector::new(script)),
            Box::new(CircleMarker::new()),
            events,
        );
        stage.negotiate(FrameGeometry::new(WIDTH, HEIGHT)).unwrap();
        (stage, receiver)
    }

    fn region() -> BoundingBox {
        BoundingBox::new(10, 20, 30, 40)
    }

    // --- Tests ---

    #[test]
    fn test_absent_model_passes_frames_through() {
        let (events, receiver) = crossbeam_channel::unbounded();
        let config = StageConfig {
            profile: "/nonexistent/profile.xml".into(),
            display: true,
        };
        let mut stage = DetectionStage::new(config, events);
        assert_eq!(stage.model_state(), ModelState::Absent);

        stage.negotiate(FrameGeometry::new(WIDTH, HEIGHT)).unwrap();
        let mut frame = frame();
        let snapshot = frame.clone();
        stage.process_frame(&mut frame).unwrap();

        assert_eq!(frame.data(), snapshot.data());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_event_reports_region_center_and_size() {
        let (mut stage, receiver) = scripted_stage(vec![vec![region()]]);
        stage.set_display(false);

        stage.process_frame(&mut frame()).unwrap();

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.gesture, "fist");
        assert_eq!(event.x, 25);
        assert_eq!(event.y, 40);
        assert_eq!(event.width, 30);
        assert_eq!(event.height, 40);
    }

    #[test]
    fn test_tracked_region_survives_frames_without_candidates() {
        let (mut stage, receiver) = scripted_stage(vec![vec![region()]]);
        stage.set_display(false);

        stage.process_frame(&mut frame()).unwrap();
        assert!(receiver.try_recv().is_ok());

        // Second frame detects nothing: no event, region retained.
        stage.process_frame(&mut frame()).unwrap();
        assert!(receiver.try_recv().is_err());
        assert_eq!(stage.tracked(), region());
    }

    #[test]
    fn test_display_off_emits_events_without_touching_pixels() {
        let (mut stage, receiver) = scripted_stage(vec![vec![region()]]);
        stage.set_display(false);

        let mut frame = frame();
        let snapshot = frame.clone();
        stage.process_frame(&mut frame).unwrap();

        assert!(receiver.try_recv().is_ok());
        assert_eq!(frame.data(), snapshot.data());
    }

    #[test]
    fn test_display_on_marks_only_the_outgoing_frame() {
        let (mut stage, _receiver) = scripted_stage(vec![vec![region()]]);

        let mut frame = frame();
        let snapshot = frame.clone();
        stage.process_frame(&mut frame).unwrap();

        assert_ne!(frame.data(), snapshot.data());
        // The pre-processing clone kept its own pixels.
        assert!(snapshot.data().iter().all(|&b| b == 10));
    }

    #[test]
    fn test_stream_marks_pass_through_and_keep_the_tracker() {
        let (mut stage, _receiver) = scripted_stage(vec![vec![region()]]);
        stage.set_display(false);
        stage.process_frame(&mut frame()).unwrap();

        assert_eq!(stage.handle_event(StreamEvent::SegmentStart), StreamEvent::SegmentStart);
        assert_eq!(stage.handle_event(StreamEvent::FlushStop), StreamEvent::FlushStop);
        assert_eq!(stage.handle_event(StreamEvent::EndOfStream), StreamEvent::EndOfStream);
        assert_eq!(stage.tracked(), region());
    }

    #[test]
    fn test_frames_before_negotiation_are_rejected() {
        let (events, _receiver) = crossbeam_channel::unbounded();
        let mut stage = DetectionStage::with_components(
            StageConfig::default(),
            Box::new(ScriptedDetector::new(vec![])),
            Box::new(CircleMarker::new()),
            events,
        );

        let result = stage.process_frame(&mut frame());
        assert!(matches!(result, Err(StageError::NotNegotiated)));
    }

    #[test]
    fn test_geometry_mismatch_is_rejected() {
        let (mut stage, _receiver) = scripted_stage(vec![]);

        let mut small = Frame::new(vec![0; 32 * 32 * FRAME_CHANNELS], 32, 32);
        let result = stage.process_frame(&mut small);

        match result {
            Err(StageError::GeometryMismatch { expected, actual }) => {
                assert_eq!(expected, FrameGeometry::new(WIDTH, HEIGHT));
                assert_eq!(actual, FrameGeometry::new(32, 32));
            }
            other => panic!("expected geometry mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_renegotiation_accepts_the_new_geometry_only() {
        let (mut stage, _receiver) = scripted_stage(vec![]);

        stage.negotiate(FrameGeometry::new(32, 32)).unwrap();

        let mut small = Frame::new(vec![0; 32 * 32 * FRAME_CHANNELS], 32, 32);
        stage.process_frame(&mut small).unwrap();
        assert!(matches!(
            stage.process_frame(&mut frame()),
            Err(StageError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn test_profile_swap_walks_the_state_machine() {
        let (events, _receiver) = crossbeam_channel::unbounded();
        let mut detector = ScriptedDetector::new(vec![]);
        detector.fail_on = Some("/bad/profile.xml".into());
        let mut stage = DetectionStage::with_components(
            StageConfig::default(),
            Box::new(detector),
            Box::new(CircleMarker::new()),
            events,
        );
        assert_eq!(stage.model_state(), ModelState::Loaded);

        stage.set_profile("/bad/profile.xml");
        assert_eq!(stage.model_state(), ModelState::Absent);

        stage.set_profile("/good/profile.xml");
        assert_eq!(stage.model_state(), ModelState::Loaded);
    }

    #[test]
    fn test_apply_config_reloads_only_on_profile_change() {
        let (events, _receiver) = crossbeam_channel::unbounded();
        let detector = ScriptedDetector::new(vec![]);
        let loads = detector.loads.clone();
        let mut stage = DetectionStage::with_components(
            StageConfig::default(),
            Box::new(detector),
            Box::new(CircleMarker::new()),
            events,
        );
        assert_eq!(loads.lock().unwrap().len(), 1);

        // Same profile, different display flag: no reload.
        stage.apply_config(StageConfig {
            display: false,
            ..StageConfig::default()
        });
        assert_eq!(loads.lock().unwrap().len(), 1);
        assert!(!stage.config().display);

        // New path triggers one.
        stage.apply_config(StageConfig {
            profile: "/elsewhere/profile.xml".into(),
            ..StageConfig::default()
        });
        assert_eq!(loads.lock().unwrap().len(), 2);
        assert_eq!(loads.lock().unwrap()[1], PathBuf::from("/elsewhere/profile.xml"));
    }

    #[test]
    fn test_dropped_receiver_does_not_fail_processing() {
        let (mut stage, receiver) = scripted_stage(vec![vec![region()]]);
        drop(receiver);

        stage.process_frame(&mut frame()).unwrap();
    }

    const ACCEPT_ALL_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<fist type_id="opencv-haar-classifier">
  <size>24 24</size>
  <stages>
    <_>
      <trees>
        <_>
          <_>
            <feature>
              <rects>
                <_>0 0 24 24 1.</_></rects>
              <tilted>0</tilted></feature>
            <threshold>0.</threshold>
            <left_val>-1.</left_val>
            <right_val>1.</right_val></_></_>
      </trees>
      <stage_threshold>-100.</stage_threshold></_>
  </stages></fist>
</opencv_storage>
"#;

    fn striped_frame() -> Frame {
        let mut data = Vec::with_capacity(48 * 48 * FRAME_CHANNELS);
        for _y in 0..48 {
            for x in 0..48u32 {
                let value = if (x / 4) % 2 == 0 { 0 } else { 255 };
                data.extend_from_slice(&[value, value, value]);
            }
        }
        Frame::new(data, 48, 48)
    }

    #[test]
    fn test_profile_reload_cycle_with_real_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.xml");
        std::fs::write(&good, ACCEPT_ALL_XML).unwrap();

        let (events, receiver) = crossbeam_channel::unbounded();
        let config = StageConfig {
            profile: good.clone(),
            display: false,
        };
        let mut stage = DetectionStage::new(config, events);
        assert_eq!(stage.model_state(), ModelState::Loaded);
        stage.negotiate(FrameGeometry::new(48, 48)).unwrap();

        stage.process_frame(&mut striped_frame()).unwrap();
        assert!(receiver.try_recv().is_ok());

        // A failed swap leaves the stage without any model.
        stage.set_profile(dir.path().join("missing.xml"));
        assert_eq!(stage.model_state(), ModelState::Absent);
        stage.process_frame(&mut striped_frame()).unwrap();
        assert!(receiver.try_recv().is_err());

        stage.set_profile(good);
        assert_eq!(stage.model_state(), ModelState::Loaded);
        stage.process_frame(&mut striped_frame()).unwrap();
        assert!(receiver.try_recv().is_ok());
    }
}
