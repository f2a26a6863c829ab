use super::*;
use crate::clock::ManualClock;
use crate::pager::OffsetCursor;

const H: Ms = 3_600_000; // 1 hour in ms
const NOW: Ms = 1_700_000_000_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("shareit_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct Fixture {
    engine: Engine,
    clock: Arc<ManualClock>,
    owner: Ulid,
    booker: Ulid,
    item: Ulid,
}

async fn fixture(name: &str) -> Fixture {
    let clock = Arc::new(ManualClock::new(NOW));
    let engine =
        Engine::with_store(test_wal_path(name), InMemoryStore::new(), clock.clone()).unwrap();
    let owner = Ulid::new();
    let booker = Ulid::new();
    let item = Ulid::new();
    engine
        .register_user(owner, "Olga".into(), "olga@example.com".into())
        .await
        .unwrap();
    engine
        .register_user(booker, "Boris".into(), "boris@example.com".into())
        .await
        .unwrap();
    engine
        .add_item(item, owner, "Drill".into(), "cordless".into(), true)
        .await
        .unwrap();
    Fixture {
        engine,
        clock,
        owner,
        booker,
        item,
    }
}

impl Fixture {
    async fn book(&self, start: Ms, end: Ms) -> Result<Booking, EngineError> {
        self.engine
            .create_booking(Ulid::new(), self.booker, self.item, start, end)
            .await
    }

    async fn approve(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.engine
            .decide_booking(booking_id, self.owner, Decision::Approve)
            .await
    }

    fn list(&self, subject: Ulid, role: Role, state: &str) -> Result<Vec<Booking>, EngineError> {
        self.engine
            .list_by_state(subject, role, Some(state), &OffsetCursor::everything())
    }
}

fn is_bad_request(result: &Result<Booking, EngineError>) -> bool {
    matches!(result, Err(e) if e.kind() == ErrorKind::BadRequest)
}

// ── Creation ─────────────────────────────────────────────

#[tokio::test]
async fn new_booking_is_waiting() {
    let f = fixture("new_waiting.wal").await;
    let b = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    assert_eq!(b.status, BookingStatus::Waiting);
    assert_eq!(b.booker_id, f.booker);
    assert_eq!(f.engine.read_booking(b.id, f.booker).unwrap(), b);
}

#[tokio::test]
async fn degenerate_span_rejected_before_anything_else() {
    let f = fixture("degenerate.wal").await;
    for (start, end) in [(NOW + H, NOW + H), (NOW + 2 * H, NOW + H)] {
        let err = f.book(start, end).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::BadRequest(Rejection::EmptySpan { .. })
        ));
    }
    // Even for an unknown item.
    let err = f
        .engine
        .create_booking(Ulid::new(), f.booker, Ulid::new(), NOW, NOW)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[tokio::test]
async fn unknown_item_or_booker_not_found() {
    let f = fixture("unknown_refs.wal").await;
    let err = f
        .engine
        .create_booking(Ulid::new(), f.booker, Ulid::new(), NOW + H, NOW + 2 * H)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(Entity::Item, _)));

    let stranger = Ulid::new();
    let err = f
        .engine
        .create_booking(Ulid::new(), stranger, f.item, NOW + H, NOW + 2 * H)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(Entity::User, id) if id == stranger));
}

#[tokio::test]
async fn owner_cannot_book_own_item() {
    let f = fixture("self_booking.wal").await;
    let err = f
        .engine
        .create_booking(Ulid::new(), f.owner, f.item, NOW + H, NOW + 2 * H)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(Entity::Item, _)));
}

#[tokio::test]
async fn unavailable_item_rejected() {
    let f = fixture("unavailable_create.wal").await;
    f.engine
        .set_item_available(f.item, f.owner, false)
        .await
        .unwrap();
    let result = f.book(NOW + H, NOW + 2 * H).await;
    assert!(matches!(
        result,
        Err(EngineError::BadRequest(Rejection::ItemUnavailable(_)))
    ));
}

#[tokio::test]
async fn duplicate_booking_id_rejected() {
    let f = fixture("duplicate_id.wal").await;
    let b = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    let err = f
        .engine
        .create_booking(b.id, f.booker, f.item, NOW + 3 * H, NOW + 4 * H)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn same_id_on_two_items_concurrently_only_one_lands() {
    let f = fixture("duplicate_id_race.wal").await;
    let other_item = Ulid::new();
    f.engine
        .add_item(other_item, f.owner, "Ladder".into(), String::new(), true)
        .await
        .unwrap();

    let id = Ulid::new();
    let (on_first, on_other) = tokio::join!(
        f.engine
            .create_booking(id, f.booker, f.item, NOW + H, NOW + 2 * H),
        f.engine
            .create_booking(id, f.booker, other_item, NOW + H, NOW + 2 * H),
    );
    assert_eq!(
        [&on_first, &on_other].iter().filter(|r| r.is_ok()).count(),
        1
    );
    let loser = if on_first.is_ok() { on_other } else { on_first };
    assert!(matches!(loser, Err(EngineError::AlreadyExists(x)) if x == id));

    let winner = f.engine.store().find_booking(&id).unwrap();
    let loser_item = if winner.item_id == f.item { other_item } else { f.item };
    assert!(f.engine.store().bookings_for_item(&loser_item).is_empty());

    // The winner's item still refuses a second approved overlap.
    let rival = f
        .engine
        .create_booking(Ulid::new(), f.booker, winner.item_id, NOW + H, NOW + 2 * H)
        .await
        .unwrap();
    f.approve(id).await.unwrap();
    assert!(is_bad_request(&f.approve(rival.id).await));
    assert_eq!(
        f.engine
            .store()
            .count_approved_overlapping(&winner.item_id, &Span::new(NOW + H, NOW + 2 * H)),
        1
    );
}

#[tokio::test]
async fn concurrent_duplicate_user_registers_once() {
    let f = fixture("duplicate_user_race.wal").await;
    let id = Ulid::new();
    let (a, b) = tokio::join!(
        f.engine.register_user(id, "Ann".into(), "ann@example.com".into()),
        f.engine.register_user(id, "Ann".into(), "ann2@example.com".into()),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert!(matches!(a.and(b), Err(EngineError::AlreadyExists(_))));

    let (a, b) = tokio::join!(
        f.engine.add_item(id, f.owner, "Saw".into(), String::new(), true),
        f.engine.add_item(id, f.booker, "Saw".into(), String::new(), true),
    );
    let winner = if a.is_ok() { f.owner } else { f.booker };
    assert!(matches!(a.and(b), Err(EngineError::AlreadyExists(_))));
    assert_eq!(f.engine.store().find_item(&id).unwrap().owner_id, winner);
}

#[tokio::test]
async fn waiting_bookings_may_overlap() {
    let f = fixture("waiting_overlap.wal").await;
    f.book(NOW + H, NOW + 3 * H).await.unwrap();
    f.book(NOW + 2 * H, NOW + 4 * H).await.unwrap();
}

#[tokio::test]
async fn creating_over_approved_booking_rejected() {
    let f = fixture("create_over_approved.wal").await;
    let first = f.book(NOW + H, NOW + 3 * H).await.unwrap();
    f.approve(first.id).await.unwrap();
    let result = f.book(NOW + 2 * H, NOW + 4 * H).await;
    assert!(matches!(
        result,
        Err(EngineError::BadRequest(Rejection::Reserved { .. }))
    ));
}

#[tokio::test]
async fn touching_intervals_do_not_conflict() {
    let f = fixture("touching.wal").await;
    let first = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    f.approve(first.id).await.unwrap();
    let before = f.book(NOW, NOW + H).await.unwrap();
    let after = f.book(NOW + 2 * H, NOW + 3 * H).await.unwrap();
    f.approve(before.id).await.unwrap();
    f.approve(after.id).await.unwrap();
}

// ── Decisions ────────────────────────────────────────────

#[tokio::test]
async fn approve_and_reject() {
    let f = fixture("approve_reject.wal").await;
    let a = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    let r = f.book(NOW + 3 * H, NOW + 4 * H).await.unwrap();
    assert_eq!(f.approve(a.id).await.unwrap().status, BookingStatus::Approved);
    let rejected = f
        .engine
        .decide_booking(r.id, f.owner, Decision::Reject)
        .await
        .unwrap();
    assert_eq!(rejected.status, BookingStatus::Rejected);
    assert_eq!(
        f.engine.read_booking(r.id, f.booker).unwrap().status,
        BookingStatus::Rejected
    );
}

#[tokio::test]
async fn overlapping_approval_refused_after_first_wins() {
    let f = fixture("overlap_approve.wal").await;
    let b1 = f.book(NOW + H, NOW + 3 * H).await.unwrap();
    let b2 = f.book(NOW + 2 * H, NOW + 4 * H).await.unwrap();
    f.approve(b1.id).await.unwrap();
    let result = f.approve(b2.id).await;
    assert!(is_bad_request(&result));
    assert_eq!(
        f.engine.read_booking(b2.id, f.owner).unwrap().status,
        BookingStatus::Waiting
    );
    // Rejecting the loser is still allowed.
    f.engine
        .decide_booking(b2.id, f.owner, Decision::Reject)
        .await
        .unwrap();
}

#[tokio::test]
async fn already_decided_is_bad_request() {
    let f = fixture("already_decided.wal").await;
    let b = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    f.approve(b.id).await.unwrap();
    let result = f
        .engine
        .decide_booking(b.id, f.owner, Decision::Reject)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::BadRequest(Rejection::NotWaiting(
            BookingStatus::Approved
        )))
    ));
}

#[tokio::test]
async fn elapsed_booking_cannot_be_decided() {
    let f = fixture("elapsed.wal").await;
    let b = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    f.clock.set(NOW + 2 * H);
    let result = f.approve(b.id).await;
    assert!(matches!(
        result,
        Err(EngineError::BadRequest(Rejection::Elapsed { .. }))
    ));
}

#[tokio::test]
async fn in_progress_booking_can_still_be_approved() {
    let f = fixture("in_progress.wal").await;
    let b = f.book(NOW + H, NOW + 3 * H).await.unwrap();
    f.clock.set(NOW + 2 * H);
    f.approve(b.id).await.unwrap();
}

#[tokio::test]
async fn unavailable_item_blocks_decision() {
    let f = fixture("unavailable_decide.wal").await;
    let b = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    f.engine
        .set_item_available(f.item, f.owner, false)
        .await
        .unwrap();
    let result = f.approve(b.id).await;
    assert!(matches!(
        result,
        Err(EngineError::BadRequest(Rejection::ItemUnavailable(_)))
    ));
}

#[tokio::test]
async fn only_owner_decides() {
    let f = fixture("only_owner.wal").await;
    let b = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    let err = f
        .engine
        .decide_booking(b.id, f.booker, Decision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(Entity::Booking, _)));

    let err = f
        .engine
        .decide_booking(Ulid::new(), f.owner, Decision::Approve)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn concurrent_approvals_only_one_wins() {
    let f = fixture("concurrent_approve.wal").await;
    let mut ids = Vec::new();
    for i in 0..8 {
        let b = f.book(NOW + H + i * 60_000, NOW + 3 * H).await.unwrap();
        ids.push(b.id);
    }
    let engine = Arc::new(f.engine);
    let mut handles = Vec::new();
    for id in ids {
        let engine = engine.clone();
        let owner = f.owner;
        handles.push(tokio::spawn(async move {
            engine.decide_booking(id, owner, Decision::Approve).await
        }));
    }
    let mut approved = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            approved += 1;
        }
    }
    assert_eq!(approved, 1);
    assert_eq!(
        count_conflicts(engine.store(), &f.item, &Span::new(NOW, NOW + 4 * H)),
        1
    );
}

// ── Reads ────────────────────────────────────────────────

#[tokio::test]
async fn third_party_read_is_not_found() {
    let f = fixture("third_party.wal").await;
    let b = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    assert!(f.engine.read_booking(b.id, f.owner).is_ok());
    let err = f.engine.read_booking(b.id, Ulid::new()).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(Entity::Booking, id) if id == b.id));
}

#[tokio::test]
async fn current_scenario_end_to_end() {
    let f = fixture("current_scenario.wal").await;
    let b = f.book(NOW + H, NOW + 3 * H).await.unwrap();
    f.approve(b.id).await.unwrap();
    f.clock.set(NOW + 2 * H);

    let booker_view = f.list(f.booker, Role::Booker, "CURRENT").unwrap();
    assert_eq!(booker_view.len(), 1);
    assert_eq!(booker_view[0].id, b.id);
    let owner_view = f.list(f.owner, Role::Owner, "CURRENT").unwrap();
    assert_eq!(owner_view[0].id, b.id);

    assert!(matches!(
        f.list(f.booker, Role::Booker, "FUTURE"),
        Err(EngineError::NoBookings(StateFilter::Future))
    ));
    f.clock.set(NOW + 3 * H);
    assert_eq!(f.list(f.booker, Role::Booker, "PAST").unwrap().len(), 1);
}

#[tokio::test]
async fn second_booker_refused_after_approval() {
    let f = fixture("second_booker.wal").await;
    let carol = Ulid::new();
    f.engine
        .register_user(carol, "Carol".into(), "carol@example.com".into())
        .await
        .unwrap();
    let b1 = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    f.approve(b1.id).await.unwrap();

    let err = f
        .engine
        .create_booking(Ulid::new(), carol, f.item, NOW + H, NOW + 2 * H)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(matches!(
        f.list(carol, Role::Booker, "ALL"),
        Err(EngineError::NoBookings(StateFilter::All))
    ));
}

#[tokio::test]
async fn list_by_status_and_all() {
    let f = fixture("list_status.wal").await;
    let w = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    let r = f.book(NOW + 3 * H, NOW + 4 * H).await.unwrap();
    f.engine
        .decide_booking(r.id, f.owner, Decision::Reject)
        .await
        .unwrap();

    let waiting = f.list(f.booker, Role::Booker, "waiting").unwrap();
    assert_eq!(waiting.iter().map(|b| b.id).collect::<Vec<_>>(), vec![w.id]);
    let rejected = f.list(f.owner, Role::Owner, "REJECTED").unwrap();
    assert_eq!(rejected.iter().map(|b| b.id).collect::<Vec<_>>(), vec![r.id]);

    // Newest first.
    let all = f
        .engine
        .list_by_state(f.booker, Role::Booker, None, &OffsetCursor::everything())
        .unwrap();
    assert_eq!(all.iter().map(|b| b.id).collect::<Vec<_>>(), vec![r.id, w.id]);
}

#[tokio::test]
async fn list_errors() {
    let f = fixture("list_errors.wal").await;
    let err = f.list(f.booker, Role::Booker, "ALL").unwrap_err();
    assert!(matches!(err, EngineError::NoBookings(StateFilter::All)));

    let err = f.list(f.booker, Role::Booker, "UNSUPPORTED_STATUS").unwrap_err();
    assert_eq!(err.to_string(), "bad request: Unknown state: UNSUPPORTED_STATUS");

    let err = f.list(Ulid::new(), Role::Owner, "ALL").unwrap_err();
    assert!(matches!(err, EngineError::NotFound(Entity::User, _)));
}

#[tokio::test]
async fn list_pages() {
    let f = fixture("list_pages.wal").await;
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(f.book(NOW + i * H, NOW + i * H + 1).await.unwrap().id);
    }
    ids.reverse();

    let page = OffsetCursor::of_offset(Some(2), Some(2), None).unwrap();
    let rows = f
        .engine
        .list_by_state(f.booker, Role::Booker, None, &page)
        .unwrap();
    assert_eq!(rows.iter().map(|b| b.id).collect::<Vec<_>>(), ids[2..4]);

    let past_end = OffsetCursor::of_offset(Some(10), Some(2), None).unwrap();
    assert!(matches!(
        f.engine
            .list_by_state(f.booker, Role::Booker, None, &past_end),
        Err(EngineError::NoBookings(_))
    ));
}

#[tokio::test]
async fn item_summary_owner_only() {
    let f = fixture("summary.wal").await;
    let past = f.book(NOW + H, NOW + 2 * H).await.unwrap();
    let future = f.book(NOW + 5 * H, NOW + 6 * H).await.unwrap();
    f.approve(past.id).await.unwrap();
    f.approve(future.id).await.unwrap();
    f.clock.set(NOW + 3 * H);

    let summary = f.engine.item_booking_summary(f.item, f.owner).unwrap();
    assert_eq!(summary.last.map(|b| b.id), Some(past.id));
    assert_eq!(summary.next.map(|b| b.id), Some(future.id));

    let hidden = f.engine.item_booking_summary(f.item, f.booker).unwrap();
    assert_eq!(hidden, ItemBookingSummary::default());

    assert!(f.engine.has_completed_booking(f.booker, f.item));
    assert!(!f.engine.has_completed_booking(f.owner, f.item));
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn availability_toggle_owner_only() {
    let f = fixture("toggle.wal").await;
    let err = f
        .engine
        .set_item_available(f.item, f.booker, false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(Entity::Item, _)));
    let item = f
        .engine
        .set_item_available(f.item, f.owner, false)
        .await
        .unwrap();
    assert!(!item.available);
}

#[tokio::test]
async fn catalog_rejects_duplicates_and_orphans() {
    let f = fixture("catalog.wal").await;
    let err = f
        .engine
        .register_user(f.owner, "x".into(), "x@example.com".into())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));
    let err = f
        .engine
        .add_item(Ulid::new(), Ulid::new(), "x".into(), String::new(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(Entity::User, _)));
    let err = f
        .engine
        .register_user(Ulid::new(), "n".repeat(crate::limits::MAX_NAME_LEN + 1), String::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let clock = Arc::new(ManualClock::new(NOW));
    let owner = Ulid::new();
    let booker = Ulid::new();
    let item = Ulid::new();
    let (approved, waiting) = {
        let engine =
            Engine::with_store(path.clone(), InMemoryStore::new(), clock.clone()).unwrap();
        engine
            .register_user(owner, "o".into(), "o@example.com".into())
            .await
            .unwrap();
        engine
            .register_user(booker, "b".into(), "b@example.com".into())
            .await
            .unwrap();
        engine
            .add_item(item, owner, "Tent".into(), String::new(), true)
            .await
            .unwrap();
        let a = engine
            .create_booking(Ulid::new(), booker, item, NOW + H, NOW + 2 * H)
            .await
            .unwrap();
        let w = engine
            .create_booking(Ulid::new(), booker, item, NOW + 3 * H, NOW + 4 * H)
            .await
            .unwrap();
        engine
            .decide_booking(a.id, owner, Decision::Approve)
            .await
            .unwrap();
        (a.id, w.id)
    };

    let engine = Engine::with_store(path, InMemoryStore::new(), clock).unwrap();
    assert_eq!(
        engine.read_booking(approved, booker).unwrap().status,
        BookingStatus::Approved
    );
    assert_eq!(
        engine.read_booking(waiting, owner).unwrap().status,
        BookingStatus::Waiting
    );
    // Item locks come back with the items.
    let err = engine
        .create_booking(Ulid::new(), booker, item, NOW + H, NOW + 2 * H)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::BadRequest(Rejection::Reserved { .. })
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let clock = Arc::new(ManualClock::new(NOW));
    let (owner, booking) = {
        let f = {
            let engine =
                Engine::with_store(path.clone(), InMemoryStore::new(), clock.clone()).unwrap();
            let owner = Ulid::new();
            let booker = Ulid::new();
            let item = Ulid::new();
            engine
                .register_user(owner, "o".into(), "o@example.com".into())
                .await
                .unwrap();
            engine
                .register_user(booker, "b".into(), "b@example.com".into())
                .await
                .unwrap();
            engine
                .add_item(item, owner, "Kayak".into(), String::new(), true)
                .await
                .unwrap();
            Fixture {
                engine,
                clock: clock.clone(),
                owner,
                booker,
                item,
            }
        };
        for available in [false, true, false, true] {
            f.engine
                .set_item_available(f.item, f.owner, available)
                .await
                .unwrap();
        }
        let b = f.book(NOW + H, NOW + 2 * H).await.unwrap();
        f.engine
            .decide_booking(b.id, f.owner, Decision::Reject)
            .await
            .unwrap();
        assert_eq!(f.engine.wal_appends_since_compact().await, 9);
        f.engine.compact_wal().await.unwrap();
        assert_eq!(f.engine.wal_appends_since_compact().await, 0);
        (f.owner, b.id)
    };

    // users + item + request + decision
    assert_eq!(crate::wal::Wal::replay(&path).unwrap().len(), 5);
    let engine = Engine::with_store(path, InMemoryStore::new(), clock).unwrap();
    assert_eq!(
        engine.read_booking(booking, owner).unwrap().status,
        BookingStatus::Rejected
    );
}
