use anyhow::Result;
use rollcall::{
    mark_attendance, AttendanceLedger, FailureKind, FileLedger, Geofence, GeoVerifier, MarkRequest,
    MemoryLedger, VerifyError,
};

fn request(session: &str, student: &str, at: Option<(f64, f64)>) -> MarkRequest {
    MarkRequest {
        session_id: session.into(),
        student_id: student.into(),
        speech_ok: true,
        face_ok: true,
        lat: at.map(|p| p.0),
        lng: at.map(|p| p.1),
        client_ip: None,
    }
}

fn lecture_hall() -> Result<Geofence> {
    Ok(Geofence::new(12.9716, 77.5946, 50.0)?)
}

#[test]
fn test_second_mark_is_a_duplicate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ledger = FileLedger::new(dir.path().join("attendance.bin"));
    let geo = GeoVerifier::default();

    let fact = mark_attendance(&ledger, &geo, None, &request("cs101", "alice", None))?;
    assert!(fact.geo_ok && fact.face_ok && fact.speech_ok);

    let again = mark_attendance(&ledger, &geo, None, &request("cs101", "alice", None));
    match again {
        Err(err @ VerifyError::DuplicateAttendance { .. }) => {
            assert_eq!(err.kind(), FailureKind::Input)
        }
        other => panic!("expected duplicate, got {other:?}"),
    }
    assert_eq!(ledger.all()?.len(), 1);
    Ok(())
}

#[test]
fn test_fenced_session_needs_a_position() -> Result<()> {
    let ledger = MemoryLedger::new();
    let fence = lecture_hall()?;
    let result = mark_attendance(
        &ledger,
        &GeoVerifier::default(),
        Some(&fence),
        &request("cs101", "alice", None),
    );
    assert!(matches!(result, Err(VerifyError::GeolocationRequired)));
    assert!(ledger.all()?.is_empty());
    Ok(())
}

#[test]
fn test_fenced_session_checks_distance() -> Result<()> {
    let ledger = MemoryLedger::new();
    let fence = lecture_hall()?;
    let geo = GeoVerifier::default();

    let far = mark_attendance(
        &ledger,
        &geo,
        Some(&fence),
        &request("cs101", "bob", Some((12.9760, 77.6))),
    );
    assert!(matches!(
        far,
        Err(VerifyError::OutsideGeofence { distance_m }) if distance_m > 50.0
    ));

    let near = mark_attendance(
        &ledger,
        &geo,
        Some(&fence),
        &request("cs101", "bob", Some((12.9717, 77.5946))),
    )?;
    assert!(near.geo_ok);
    Ok(())
}

#[test]
fn test_unfenced_session_ignores_position() -> Result<()> {
    let ledger = MemoryLedger::new();
    let fact = mark_attendance(
        &ledger,
        &GeoVerifier::default(),
        Geofence::from_session(Some(12.9716), None, Some(50.0))?.as_ref(),
        &request("cs101", "carol", Some((48.8566, 2.3522))),
    )?;
    assert_eq!(fact.student_id, "carol");
    Ok(())
}

#[test]
fn test_ledger_survives_reopen_and_lists() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("attendance.bin");
    let geo = GeoVerifier::default();
    {
        let ledger = FileLedger::new(&path);
        mark_attendance(&ledger, &geo, None, &request("cs101", "alice", None))?;
        mark_attendance(&ledger, &geo, None, &request("cs101", "bob", None))?;
        mark_attendance(&ledger, &geo, None, &request("ma201", "alice", None))?;
    }

    let ledger = FileLedger::new(&path);
    let cs101: Vec<_> = ledger
        .by_session("cs101")?
        .into_iter()
        .map(|f| f.student_id)
        .collect();
    assert_eq!(cs101, vec!["bob", "alice"]);

    let alice: Vec<_> = ledger
        .by_student("alice")?
        .into_iter()
        .map(|f| f.session_id)
        .collect();
    assert_eq!(alice, vec!["ma201", "cs101"]);

    assert!(matches!(
        mark_attendance(&ledger, &geo, None, &request("ma201", "alice", None)),
        Err(VerifyError::DuplicateAttendance { .. })
    ));
    Ok(())
}
