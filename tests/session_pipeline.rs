use std::sync::{Arc, Mutex};

use anyhow::Result;

use zone_watch::detect::CpuBackend;
use zone_watch::ingest::{SourceSettings, SourceSpec};
use zone_watch::session::{EndReason, Session, SessionFrame, SessionSettings};
use zone_watch::tracker::{PersonId, ZoneStatus};

fn settings(frames: u64, render: bool) -> SessionSettings {
    SessionSettings {
        source: SourceSettings {
            max_frames: Some(frames),
            ..SourceSettings::default()
        },
        render,
        pace: false,
        ..SessionSettings::default()
    }
}

#[test]
fn seated_person_stays_inside_while_walker_leaves() -> Result<()> {
    let spec = SourceSpec::parse("stub://scene")?;
    let mut session = Session::new(spec, &settings(80, false), Arc::new(Mutex::new(CpuBackend::new())))?;

    let mut frames: Vec<SessionFrame> = Vec::new();
    let mut sink = |frame: &SessionFrame| -> Result<()> {
        frames.push(frame.clone());
        Ok(())
    };
    let summary = session.run(&mut sink, &|| false)?;

    assert_eq!(summary.ended, EndReason::SourceEnded);
    assert_eq!(summary.frames, 80);
    assert_eq!(summary.persons_seen, 2);
    assert!(summary.outside_observations > 0);

    // Both actors stay in view for the whole clip.
    assert!(frames.iter().all(|f| f.observations.len() == 2));

    // Before the window closes nobody has a zone.
    let early = &frames[10];
    assert!(early
        .observations
        .iter()
        .all(|o| o.status == ZoneStatus::Observing && o.home_zone.is_none()));

    // After it closes and before anyone moves, both are inside.
    let settled = &frames[30];
    assert!(settled
        .observations
        .iter()
        .all(|o| o.status == ZoneStatus::Inside));

    let last = frames.last().expect("frames");
    let seated = last
        .observations
        .iter()
        .find(|o| o.bbox.left < 300.0)
        .expect("seated actor");
    let walker = last
        .observations
        .iter()
        .find(|o| o.bbox.left > 300.0)
        .expect("walker");
    assert_eq!(seated.status, ZoneStatus::Inside);
    assert_eq!(walker.status, ZoneStatus::Outside);
    assert_ne!(seated.id, walker.id);
    assert!([PersonId(1), PersonId(2)].contains(&walker.id));
    Ok(())
}

#[test]
fn rendered_frames_are_jpeg() -> Result<()> {
    let spec = SourceSpec::parse("stub://still")?;
    let mut session = Session::new(spec, &settings(3, true), Arc::new(Mutex::new(CpuBackend::new())))?;
    while let Some(frame) = session.step()? {
        let jpeg = frame.jpeg.expect("rendered frame");
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!((frame.width, frame.height), (640, 480));
    }
    assert_eq!(session.frames(), 3);
    Ok(())
}

#[test]
fn unknown_scene_fails_to_start() {
    let spec = SourceSpec::parse("stub://nowhere").expect("parses");
    assert!(Session::new(spec, &settings(1, false), Arc::new(Mutex::new(CpuBackend::new()))).is_err());
}
