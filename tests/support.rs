use indexeddb_store::{DatabaseHandle, Durability, Engine, RequestResult, Shared, TransactionHandle};

/// Drains a database's task and microtask queues to quiescence, standing in
/// for the host's event loop + microtask checkpoint.
pub fn pump(engine: &Shared<Engine>, name: &str) {
    loop {
        let tasks = engine.borrow_mut().tasks_for(name).expect("slot exists");
        let microtasks = engine.borrow_mut().microtasks_for(name).expect("slot exists");
        if tasks.is_empty() && microtasks.is_empty() {
            break;
        }
        microtasks.drain();
        tasks.drain();
    }
}

pub fn new_engine() -> (tempfile::TempDir, Shared<Engine>) {
    // Tests run as separate threads in one process, so a second `init()`
    // would panic; `try_init()` just no-ops past the first caller.
    let _ = env_logger::try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Engine::new(dir.path().to_path_buf(), Durability::Strict);
    (dir, engine)
}

/// Opens `name` at `version`, running `upgrade` inside the version-change
/// transaction, and pumps the event loop until the request settles.
pub fn open_db(
    engine: &Shared<Engine>,
    name: &str,
    version: u64,
    upgrade: impl FnOnce(&TransactionHandle, &DatabaseHandle, u64, u64) + 'static,
) -> DatabaseHandle {
    let request = indexeddb_store::open(engine, name, Some(version), upgrade);
    pump(engine, name);
    let r = request.borrow();
    match (&r.result, &r.error) {
        (Some(RequestResult::Connection(Some(db))), _) => db.clone(),
        (_, Some(e)) => panic!("open({name}) failed: {e}"),
        _ => panic!("open({name}) request never settled"),
    }
}
