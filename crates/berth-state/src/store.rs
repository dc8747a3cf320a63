//! StateStore — redb-backed persistence for sandboxes, releases and the
//! execution ledger.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. Ids come
//! from a per-table sequence bumped inside the inserting transaction. The
//! store supports both on-disk and in-memory backends (the latter for tests).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use berth_core::naming::{generate_secret, generate_slug};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

const SLUG_ATTEMPTS: usize = 16;

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Bump and return the sequence named `sequence` inside `txn`.
fn next_id(txn: &WriteTransaction, sequence: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table
        .get(sequence)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(sequence, next).map_err(map_err!(Write))?;
    Ok(next)
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(SANDBOXES).map_err(map_err!(Table))?;
        txn.open_table(RELEASES).map_err(map_err!(Table))?;
        txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        txn.open_table(LOG_LINES).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic record access ──────────────────────────────────────

    fn put<T: Serialize>(&self, def: RecordTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, def: RecordTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, def: RecordTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Read-modify-write a record in one transaction.
    fn update<T, F>(&self, def: RecordTable, entity: &'static str, key: &str, f: F) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let mut record: T = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::not_found(entity, key)),
            };
            f(&mut record);
            let bytes = encode(&record)?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    // ── Sandboxes ──────────────────────────────────────────────────

    /// Create a pending sandbox with a fresh unique slug and access token.
    pub fn create_sandbox(&self, exposed: bool) -> StateResult<Sandbox> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let sandbox = {
            let taken: HashSet<String> = {
                let table = txn.open_table(SANDBOXES).map_err(map_err!(Table))?;
                let mut slugs = HashSet::new();
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    let existing: Sandbox = decode(value.value())?;
                    slugs.insert(existing.slug);
                }
                slugs
            };
            let slug = (0..SLUG_ATTEMPTS)
                .map(|_| generate_slug())
                .find(|slug| !taken.contains(slug))
                .ok_or(StateError::SlugExhausted)?;

            let id = next_id(&txn, "sandboxes")?;
            let now = epoch_secs();
            let sandbox = Sandbox {
                id,
                slug,
                state: SandboxState::Pending,
                ssh_key: None,
                exposed,
                access_token: generate_secret(32),
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            let bytes = encode(&sandbox)?;
            let mut table = txn.open_table(SANDBOXES).map_err(map_err!(Table))?;
            table
                .insert(sandbox.table_key().as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
            sandbox
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = sandbox.id, slug = %sandbox.slug, "sandbox created");
        Ok(sandbox)
    }

    pub fn put_sandbox(&self, sandbox: &Sandbox) -> StateResult<()> {
        self.put(SANDBOXES, &sandbox.table_key(), sandbox)
    }

    pub fn get_sandbox(&self, id: SandboxId) -> StateResult<Option<Sandbox>> {
        self.get(SANDBOXES, &id_key(id))
    }

    /// Like [`get_sandbox`](Self::get_sandbox) but treats absence as an error.
    pub fn require_sandbox(&self, id: SandboxId) -> StateResult<Sandbox> {
        self.get_sandbox(id)?
            .ok_or_else(|| StateError::not_found("sandbox", id))
    }

    /// Apply `f` to the stored sandbox and bump `updated_at`.
    pub fn update_sandbox<F>(&self, id: SandboxId, f: F) -> StateResult<Sandbox>
    where
        F: FnOnce(&mut Sandbox),
    {
        self.update(SANDBOXES, "sandbox", &id_key(id), |s: &mut Sandbox| {
            f(s);
            s.updated_at = epoch_secs();
        })
    }

    pub fn list_sandboxes(&self) -> StateResult<Vec<Sandbox>> {
        self.list(SANDBOXES)
    }

    pub fn find_sandbox_by_slug(&self, slug: &str) -> StateResult<Option<Sandbox>> {
        Ok(self.list_sandboxes()?.into_iter().find(|s| s.slug == slug))
    }

    /// Most recently created sandbox, optionally restricted to one state.
    pub fn latest_sandbox(&self, state: Option<SandboxState>) -> StateResult<Option<Sandbox>> {
        Ok(self
            .list_sandboxes()?
            .into_iter()
            .filter(|s| state.is_none_or(|wanted| s.state == wanted))
            .max_by_key(|s| s.id))
    }

    /// Delete a sandbox and, by cascade, its executions and log lines.
    pub fn delete_sandbox(&self, id: SandboxId) -> StateResult<bool> {
        self.delete_owned(SANDBOXES, &id_key(id), ExecutionOwner::Sandbox(id))
    }

    // ── Releases ───────────────────────────────────────────────────

    /// Create a pending release for `environment`.
    pub fn create_release(&self, environment: &str, branch: &str) -> StateResult<Release> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let release = {
            let id = next_id(&txn, "releases")?;
            let now = epoch_secs();
            let release = Release {
                id,
                environment: environment.to_string(),
                branch: branch.to_string(),
                state: ReleaseState::Pending,
                server_id: None,
                server_ip: None,
                private_ip: None,
                ssh_key: None,
                tunnel_id: None,
                registry_tag: None,
                last_error: None,
                deployed_at: None,
                database_passwords: Default::default(),
                bootstrapped_server_id: None,
                created_at: now,
                updated_at: now,
            };
            let bytes = encode(&release)?;
            let mut table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
            table
                .insert(release.table_key().as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
            release
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = release.id, environment, "release created");
        Ok(release)
    }

    pub fn put_release(&self, release: &Release) -> StateResult<()> {
        self.put(RELEASES, &release.table_key(), release)
    }

    pub fn get_release(&self, id: ReleaseId) -> StateResult<Option<Release>> {
        self.get(RELEASES, &id_key(id))
    }

    pub fn require_release(&self, id: ReleaseId) -> StateResult<Release> {
        self.get_release(id)?
            .ok_or_else(|| StateError::not_found("release", id))
    }

    /// Apply `f` to the stored release and bump `updated_at`.
    pub fn update_release<F>(&self, id: ReleaseId, f: F) -> StateResult<Release>
    where
        F: FnOnce(&mut Release),
    {
        self.update(RELEASES, "release", &id_key(id), |r: &mut Release| {
            f(r);
            r.updated_at = epoch_secs();
        })
    }

    pub fn list_releases(&self) -> StateResult<Vec<Release>> {
        self.list(RELEASES)
    }

    /// Most recently created release, optionally for one environment.
    pub fn latest_release(&self, environment: Option<&str>) -> StateResult<Option<Release>> {
        Ok(self
            .list_releases()?
            .into_iter()
            .filter(|r| environment.is_none_or(|env| r.environment == env))
            .max_by_key(|r| r.id))
    }

    pub fn delete_release(&self, id: ReleaseId) -> StateResult<bool> {
        self.delete_owned(RELEASES, &id_key(id), ExecutionOwner::Release(id))
    }

    fn delete_owned(&self, def: RecordTable, key: &str, owner: ExecutionOwner) -> StateResult<bool> {
        let executions: Vec<ExecutionId> = self
            .list_executions(owner)?
            .into_iter()
            .map(|e| e.id)
            .collect();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut lines = txn.open_table(LOG_LINES).map_err(map_err!(Table))?;
            let mut execs = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
            for execution_id in &executions {
                let (start, end) = log_execution_range(*execution_id);
                let keys: Vec<String> = lines
                    .range(start.as_str()..end.as_str())
                    .map_err(map_err!(Read))?
                    .filter_map(|entry| entry.ok().map(|(k, _)| k.value().to_string()))
                    .collect();
                for k in &keys {
                    lines.remove(k.as_str()).map_err(map_err!(Write))?;
                }
                execs
                    .remove(id_key(*execution_id).as_str())
                    .map_err(map_err!(Write))?;
            }
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%owner, existed, executions = executions.len(), "owner deleted");
        Ok(existed)
    }

    // ── Executions ─────────────────────────────────────────────────

    /// Open a ledger entry. The exit code stays unset until finished.
    pub fn create_execution(&self, new: NewExecution) -> StateResult<Execution> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let execution = {
            let id = next_id(&txn, "executions")?;
            let execution = Execution {
                id,
                owner: new.owner,
                command: new.command,
                kind: new.kind,
                tag: new.tag,
                category: new.category,
                exit_code: None,
                started_at: epoch_secs(),
                finished_at: None,
                session: new.session,
            };
            let bytes = encode(&execution)?;
            let mut table = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
            table
                .insert(execution.table_key().as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
            execution
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(execution)
    }

    /// Record completion. `exit_code` is `None` when the command never
    /// produced one (transport failure).
    pub fn finish_execution(&self, id: ExecutionId, exit_code: Option<i32>) -> StateResult<Execution> {
        self.update(EXECUTIONS, "execution", &id_key(id), |e: &mut Execution| {
            e.exit_code = exit_code;
            e.finished_at = Some(epoch_secs());
        })
    }

    pub fn get_execution(&self, id: ExecutionId) -> StateResult<Option<Execution>> {
        self.get(EXECUTIONS, &id_key(id))
    }

    /// All executions of `owner`, oldest first.
    pub fn list_executions(&self, owner: ExecutionOwner) -> StateResult<Vec<Execution>> {
        Ok(self
            .list::<Execution>(EXECUTIONS)?
            .into_iter()
            .filter(|e| e.owner == owner)
            .collect())
    }

    // ── Execution log lines ────────────────────────────────────────

    /// Append `lines` to one stream of an execution, numbering them after the
    /// highest existing line number of that stream. Returns the numbers used.
    pub fn append_log_lines(
        &self,
        execution_id: ExecutionId,
        stream: LogStream,
        lines: &[String],
    ) -> StateResult<Vec<u64>> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let numbers = {
            let mut table = txn.open_table(LOG_LINES).map_err(map_err!(Table))?;
            let (start, end) = log_stream_range(execution_id, stream);
            let last = match table
                .range(start.as_str()..end.as_str())
                .map_err(map_err!(Read))?
                .next_back()
            {
                Some(entry) => {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    decode::<ExecutionLogLine>(value.value())?.line_number
                }
                None => 0,
            };

            let mut numbers = Vec::with_capacity(lines.len());
            for (offset, content) in lines.iter().enumerate() {
                let line = ExecutionLogLine {
                    execution_id,
                    stream,
                    line_number: last + offset as u64 + 1,
                    content: content.clone(),
                };
                let key = line.table_key();
                if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                    continue;
                }
                let bytes = encode(&line)?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
                numbers.push(line.line_number);
            }
            numbers
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(numbers)
    }

    /// Insert one log line unless its `(execution, stream, line_number)`
    /// already exists. Returns whether it was inserted.
    pub fn insert_log_line(&self, line: &ExecutionLogLine) -> StateResult<bool> {
        let key = line.table_key();
        let bytes = encode(line)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted = {
            let mut table = txn.open_table(LOG_LINES).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                false
            } else {
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
                true
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(inserted)
    }

    /// Every line of an execution, grouped by stream then line number.
    pub fn list_log_lines(&self, execution_id: ExecutionId) -> StateResult<Vec<ExecutionLogLine>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LOG_LINES).map_err(map_err!(Table))?;
        let (start, end) = log_execution_range(execution_id);
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    // ── Sandboxes ──────────────────────────────────────────────────

    #[test]
    fn sandbox_create_assigns_slug_and_token() {
        let store = StateStore::open_in_memory().unwrap();
        let sandbox = store.create_sandbox(true).unwrap();

        assert_eq!(sandbox.state, SandboxState::Pending);
        assert_eq!(sandbox.slug.len(), 6);
        assert_eq!(sandbox.access_token.len(), 64);
        assert!(sandbox.exposed);
        assert_eq!(store.get_sandbox(sandbox.id).unwrap(), Some(sandbox));
    }

    #[test]
    fn sandbox_slugs_are_unique() {
        let store = StateStore::open_in_memory().unwrap();
        let mut slugs = HashSet::new();
        for _ in 0..20 {
            assert!(slugs.insert(store.create_sandbox(false).unwrap().slug));
        }
    }

    #[test]
    fn sandbox_update_bumps_state() {
        let store = StateStore::open_in_memory().unwrap();
        let sandbox = store.create_sandbox(false).unwrap();

        let updated = store
            .update_sandbox(sandbox.id, |s| s.state = SandboxState::Running)
            .unwrap();
        assert_eq!(updated.state, SandboxState::Running);
        assert_eq!(updated.slug, sandbox.slug);
        assert_eq!(
            store.find_sandbox_by_slug(&sandbox.slug).unwrap().unwrap().state,
            SandboxState::Running
        );
    }

    #[test]
    fn update_missing_sandbox_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_sandbox(42, |_| {}).unwrap_err();
        assert!(matches!(err, StateError::NotFound { entity: "sandbox", .. }));
    }

    #[test]
    fn latest_sandbox_filters_by_state() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.create_sandbox(false).unwrap();
        let b = store.create_sandbox(false).unwrap();
        store
            .update_sandbox(a.id, |s| s.state = SandboxState::Running)
            .unwrap();

        assert_eq!(store.latest_sandbox(None).unwrap().unwrap().id, b.id);
        assert_eq!(
            store
                .latest_sandbox(Some(SandboxState::Running))
                .unwrap()
                .unwrap()
                .id,
            a.id
        );
    }

    // ── Releases ───────────────────────────────────────────────────

    #[test]
    fn latest_release_by_environment() {
        let store = StateStore::open_in_memory().unwrap();
        let s1 = store.create_release("staging", "main").unwrap();
        let p1 = store.create_release("production", "main").unwrap();
        let s2 = store.create_release("staging", "main").unwrap();

        assert_eq!(store.latest_release(Some("staging")).unwrap().unwrap().id, s2.id);
        assert_eq!(store.latest_release(Some("production")).unwrap().unwrap().id, p1.id);
        assert_eq!(store.latest_release(None).unwrap().unwrap().id, s2.id);
        assert!(store.latest_release(Some("qa")).unwrap().is_none());
        assert!(s1.id < s2.id);
    }

    #[test]
    fn release_update_persists_passwords() {
        let store = StateStore::open_in_memory().unwrap();
        let release = store.create_release("staging", "main").unwrap();
        store
            .update_release(release.id, |r| {
                r.database_passwords
                    .insert("postgres".to_string(), "pw".to_string());
            })
            .unwrap();
        let stored = store.require_release(release.id).unwrap();
        assert_eq!(stored.database_passwords["postgres"], "pw");
    }

    // ── Executions ─────────────────────────────────────────────────

    #[test]
    fn execution_exit_code_unset_until_finished() {
        let store = StateStore::open_in_memory().unwrap();
        let owner = ExecutionOwner::Release(1);
        let exec = store
            .create_execution(NewExecution::exec(owner, "uptime"))
            .unwrap();
        assert_eq!(exec.exit_code, None);
        assert!(!exec.failed());
        assert!(!exec.is_finished());

        let done = store.finish_execution(exec.id, Some(2)).unwrap();
        assert_eq!(done.exit_code, Some(2));
        assert!(done.failed());
        assert!(done.is_finished());

        let ok = store
            .create_execution(NewExecution::exec(owner, "true"))
            .unwrap();
        let ok = store.finish_execution(ok.id, Some(0)).unwrap();
        assert!(!ok.failed());
    }

    #[test]
    fn executions_listed_per_owner() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create_execution(NewExecution::exec(ExecutionOwner::Sandbox(1), "a"))
            .unwrap();
        store
            .create_execution(NewExecution::process(ExecutionOwner::Release(1), "b"))
            .unwrap();
        store
            .create_execution(NewExecution::exec(ExecutionOwner::Sandbox(1), "c"))
            .unwrap();

        let sandbox_execs = store.list_executions(ExecutionOwner::Sandbox(1)).unwrap();
        assert_eq!(sandbox_execs.len(), 2);
        assert_eq!(sandbox_execs[0].command, "a");
        assert_eq!(sandbox_execs[1].command, "c");
    }

    // ── Log lines ──────────────────────────────────────────────────

    #[test]
    fn log_lines_number_per_stream() {
        let store = StateStore::open_in_memory().unwrap();
        let exec = store
            .create_execution(NewExecution::exec(ExecutionOwner::Release(1), "ls"))
            .unwrap();

        let first = store
            .append_log_lines(exec.id, LogStream::Stdout, &lines(&["a", "b"]))
            .unwrap();
        let err = store
            .append_log_lines(exec.id, LogStream::Stderr, &lines(&["oops"]))
            .unwrap();
        let second = store
            .append_log_lines(exec.id, LogStream::Stdout, &lines(&["c"]))
            .unwrap();

        assert_eq!(first, vec![1, 2]);
        assert_eq!(err, vec![1]);
        assert_eq!(second, vec![3]);
    }

    #[test]
    fn repeated_appends_never_duplicate_line_numbers() {
        let store = StateStore::open_in_memory().unwrap();
        let exec = store
            .create_execution(NewExecution::exec(ExecutionOwner::Sandbox(7), "build"))
            .unwrap();
        for _ in 0..5 {
            store
                .append_log_lines(exec.id, LogStream::Stdout, &lines(&["same", "same"]))
                .unwrap();
        }

        let stored = store.list_log_lines(exec.id).unwrap();
        let numbers: Vec<u64> = stored.iter().map(|l| l.line_number).collect();
        let unique: HashSet<u64> = numbers.iter().copied().collect();
        assert_eq!(numbers.len(), 10);
        assert_eq!(unique.len(), 10);
        assert_eq!(numbers, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn insert_log_line_ignores_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let line = ExecutionLogLine {
            execution_id: 3,
            stream: LogStream::Output,
            line_number: 1,
            content: "first".to_string(),
        };
        assert!(store.insert_log_line(&line).unwrap());

        let retry = ExecutionLogLine {
            content: "second".to_string(),
            ..line.clone()
        };
        assert!(!store.insert_log_line(&retry).unwrap());

        let stored = store.list_log_lines(3).unwrap();
        assert_eq!(stored, vec![line]);
    }

    #[test]
    fn log_lines_are_scoped_to_execution() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .append_log_lines(1, LogStream::Stdout, &lines(&["one"]))
            .unwrap();
        store
            .append_log_lines(10, LogStream::Stdout, &lines(&["ten"]))
            .unwrap();
        assert_eq!(store.list_log_lines(1).unwrap().len(), 1);
        assert_eq!(store.list_log_lines(10).unwrap()[0].content, "ten");
    }

    // ── Cascading deletion ─────────────────────────────────────────

    #[test]
    fn deleting_owner_cascades_to_ledger() {
        let store = StateStore::open_in_memory().unwrap();
        let sandbox = store.create_sandbox(false).unwrap();
        let owner = ExecutionOwner::Sandbox(sandbox.id);
        let exec = store
            .create_execution(NewExecution::exec(owner, "echo hi"))
            .unwrap();
        store
            .append_log_lines(exec.id, LogStream::Stdout, &lines(&["hi"]))
            .unwrap();
        let other = store
            .create_execution(NewExecution::exec(ExecutionOwner::Release(1), "keep"))
            .unwrap();

        assert!(store.delete_sandbox(sandbox.id).unwrap());
        assert!(store.get_sandbox(sandbox.id).unwrap().is_none());
        assert!(store.get_execution(exec.id).unwrap().is_none());
        assert!(store.list_log_lines(exec.id).unwrap().is_empty());
        assert!(store.get_execution(other.id).unwrap().is_some());
        assert!(!store.delete_sandbox(sandbox.id).unwrap());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("berth.redb");

        let id = {
            let store = StateStore::open(&db_path).unwrap();
            store.create_release("production", "main").unwrap().id
        };

        let store = StateStore::open(&db_path).unwrap();
        let release = store.get_release(id).unwrap().unwrap();
        assert_eq!(release.environment, "production");
        let next = store.create_release("production", "main").unwrap();
        assert_eq!(next.id, id + 1);
    }
}
