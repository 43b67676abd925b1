//! End-to-end tracking sessions on a paused clock.
//!
//! A scripted provider feeds fixes at 1 Hz; the supervisor's persistence
//! timer, proximity watcher and meeting hand-off are checked against the
//! in-memory collaborators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};
use visitrack_core::memory::{MemoryFixSink, MemoryMeetingStore, MemoryRegistry, MemoryStatusSink};
use visitrack_core::{
    Client, Coordinate, EndMeeting, Event, FixRecord, FixSink, MeetingError, MeetingLifecycle,
    PersistError, PersistSchedule, ProximityEngine, ProximityEntry, ReplayEnd, ReplayPoint,
    ReplayProvider, SamplerError, StatusSink, TrackingOptions, TrackingSupervisor,
};

const ACME: Coordinate = Coordinate::new(19.0760, 72.8777);
/// Roughly 1.1 km north of Acme.
const ROADSIDE: Coordinate = Coordinate::new(19.0860, 72.8777);

fn registry() -> Arc<MemoryRegistry> {
    Arc::new(MemoryRegistry::with_clients(vec![Client {
        id: "acme".into(),
        name: "Acme Traders".into(),
        latitude: ACME.latitude,
        longitude: ACME.longitude,
        status: None,
    }]))
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn count(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

/// Sink whose commits block until the test releases them.
#[derive(Default)]
struct GatedSink {
    entered: Notify,
    release: Notify,
    fail: AtomicBool,
    attempts: AtomicUsize,
    records: Mutex<Vec<FixRecord>>,
}

impl GatedSink {
    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn records(&self) -> Vec<FixRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl FixSink for GatedSink {
    async fn commit(&self, record: &FixRecord) -> Result<(), PersistError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(PersistError::CommitFailed("link dropped".into()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Stop while the first commit (due at t=300) is blocked in the sink.
async fn stop_during_commit(sink: Arc<GatedSink>) {
    let sup = Arc::new(TrackingSupervisor::new(
        Arc::new(ReplayProvider::stationary(ACME)),
        Arc::clone(&sink) as _,
        registry(),
    ));
    sup.start(TrackingOptions::new("worker-7")).await.unwrap();
    sink.entered.notified().await;

    let stopping = tokio::spawn({
        let sup = Arc::clone(&sup);
        async move { sup.stop().await }
    });
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!stopping.is_finished(), "stop returned before the commit finished");

    sink.release.notify_one();
    assert!(!stopping.await.unwrap().is_running);
}

#[tokio::test(start_paused = true)]
async fn ten_minutes_at_a_client_commits_twice_and_enters_once() {
    let sink = Arc::new(MemoryFixSink::new());
    let status = Arc::new(MemoryStatusSink::new());
    let sup = TrackingSupervisor::new(
        Arc::new(ReplayProvider::stationary(ACME)),
        Arc::clone(&sink) as _,
        registry(),
    )
    .with_status_sink(Arc::clone(&status) as Arc<dyn StatusSink>);
    let mut events = sup.events().subscribe();

    sup.start(TrackingOptions::new("worker-7")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(605)).await;
    sup.stop().await;

    let events = drain(&mut events);
    assert_eq!(count(&events, |e| matches!(e, Event::ProximityEntered { .. })), 1);
    assert_eq!(count(&events, |e| matches!(e, Event::FixCommitted { .. })), 2);
    assert!(matches!(events.last(), Some(Event::TrackingStopped { .. })));

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.user_id == "worker-7"));
    assert!(status.lines().len() >= 600);
}

#[tokio::test(start_paused = true)]
async fn nothing_is_written_after_stop() {
    let sink = Arc::new(MemoryFixSink::new());
    let sup = TrackingSupervisor::new(
        Arc::new(ReplayProvider::stationary(ACME)),
        Arc::clone(&sink) as _,
        registry(),
    );

    sup.start(TrackingOptions::new("worker-7")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(301)).await;
    sup.stop().await;
    assert_eq!(sink.records().len(), 1);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_commit_is_retried_on_the_next_check() {
    let sink = Arc::new(MemoryFixSink::new());
    sink.fail_next(1);
    let sup = TrackingSupervisor::new(
        Arc::new(ReplayProvider::stationary(ACME)),
        Arc::clone(&sink) as _,
        registry(),
    );
    let mut events = sup.events().subscribe();

    sup.start(TrackingOptions::new("worker-7")).await.unwrap();
    // t=300 fails, t=360 succeeds because last_saved_at did not move
    tokio::time::sleep(Duration::from_secs(365)).await;
    sup.stop().await;

    let events = drain(&mut events);
    assert_eq!(count(&events, |e| matches!(e, Event::CommitFailed { .. })), 1);
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn gps_flicker_at_the_door_reports_one_entry() {
    let mut path: Vec<ReplayPoint> = vec![ACME.into(); 5];
    for _ in 0..4 {
        path.push(ROADSIDE.into());
        path.push(ACME.into());
    }

    let sup = TrackingSupervisor::new(
        Arc::new(ReplayProvider::new(path).with_end(ReplayEnd::Hold)),
        Arc::new(MemoryFixSink::new()),
        registry(),
    );
    let mut events = sup.events().subscribe();

    sup.start(TrackingOptions::new("worker-7")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    sup.stop().await;

    let events = drain(&mut events);
    assert_eq!(count(&events, |e| matches!(e, Event::ProximityEntered { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn meeting_start_and_end_rearm_the_client() {
    let registry = registry();
    let proximity = Arc::new(ProximityEngine::new());
    let sup = TrackingSupervisor::new(
        Arc::new(ReplayProvider::stationary(ACME)),
        Arc::new(MemoryFixSink::new()),
        Arc::clone(&registry) as _,
    )
    .with_proximity(Arc::clone(&proximity));
    let meetings = MeetingLifecycle::new(
        Arc::new(MemoryMeetingStore::new()),
        registry,
        Arc::clone(&proximity),
    )
    .with_events(sup.events().clone());
    let mut events = sup.events().subscribe();

    sup.start(TrackingOptions::new("worker-7")).await.unwrap();

    let entry = loop {
        if let Event::ProximityEntered { entity_id, fix, distance_m, .. } =
            events.recv().await.unwrap()
        {
            break ProximityEntry { entity_id, distance_m, fix };
        }
    };
    let meeting = meetings.start_from_entry(&entry).await.unwrap();
    assert_eq!(meeting.client_id, "acme");

    tokio::time::sleep(Duration::from_secs(30)).await;
    let during = drain(&mut events);
    // re-armed at start: one more entry, which an auto-starter sees as a conflict
    assert_eq!(count(&during, |e| matches!(e, Event::ProximityEntered { .. })), 1);
    assert!(matches!(
        meetings.start_from_entry(&entry).await,
        Err(MeetingError::Conflict { .. })
    ));

    meetings.end_meeting(&meeting.id, EndMeeting::default()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    sup.stop().await;

    let after = drain(&mut events);
    assert!(after.iter().any(|e| matches!(e, Event::MeetingEnded { .. })));
    assert_eq!(count(&after, |e| matches!(e, Event::ProximityEntered { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn permission_denied_never_writes() {
    let sink = Arc::new(MemoryFixSink::new());
    let sup = TrackingSupervisor::new(
        Arc::new(ReplayProvider::stationary(ACME).failing_open(SamplerError::PermissionDenied)),
        Arc::clone(&sink) as _,
        registry(),
    );

    let err = sup.start(TrackingOptions::new("worker-7")).await.unwrap_err();
    assert_eq!(err, SamplerError::PermissionDenied);
    assert!(!sup.refresh_status().await.is_running);

    tokio::time::sleep(Duration::from_secs(900)).await;
    assert!(sink.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn sampler_death_ends_the_session_without_a_refresh() {
    let sink = Arc::new(MemoryFixSink::new());
    let sup = TrackingSupervisor::new(
        Arc::new(ReplayProvider::stationary(ACME).failing_at(3, SamplerError::ServiceDisabled)),
        Arc::clone(&sink) as _,
        registry(),
    );
    let mut events = sup.events().subscribe();
    let mut status = sup.status();

    let mut options = TrackingOptions::new("worker-7");
    options.schedule = PersistSchedule {
        save_interval: Duration::ZERO,
        check_interval: Duration::from_secs(1),
    };
    sup.start(options).await.unwrap();
    assert!(status.borrow_and_update().is_running);

    // the fourth reading fails at t=4
    tokio::time::sleep(Duration::from_secs(10)).await;
    let written = sink.records().len();
    assert!(written <= 4);
    assert!(status.has_changed().unwrap());
    let current = status.borrow_and_update().clone();
    assert!(!current.is_running);
    assert_eq!(current.last_error.as_deref(), Some("location services are disabled"));
    assert!(sup.latest_fix().await.is_none());

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(sink.records().len(), written);

    let events = drain(&mut events);
    assert_eq!(count(&events, |e| matches!(e, Event::SamplerFailed { .. })), 1);
    assert!(!sup.refresh_status().await.is_running);
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_the_commit_in_flight() {
    let sink = Arc::new(GatedSink::default());
    stop_during_commit(Arc::clone(&sink)).await;
    assert_eq!(sink.records().len(), 1);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(sink.attempts(), 1);
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn commit_failing_during_stop_is_not_retried() {
    let sink = Arc::new(GatedSink::default());
    sink.fail.store(true, Ordering::SeqCst);
    stop_during_commit(Arc::clone(&sink)).await;

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(sink.attempts(), 1);
    assert!(sink.records().is_empty());
}
