use anyhow::{Context as _, anyhow};
use neovate_domain::{
    MessageRole, PersistedAppState, PersistedMessage, PersistedPendingChange, PersistedRepo,
    PersistedSession, PersistedWorkspace,
};
use rusqlite::{Connection, OptionalExtension as _, Transaction, TransactionBehavior, params};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

const LATEST_SCHEMA_VERSION: u32 = 3;

const SNAPSHOT_SAVED_AT_KEY: &str = "snapshot_saved_at";
const NEXT_WORKSPACE_ID_KEY: &str = "next_workspace_id";
const NEXT_SESSION_ID_KEY: &str = "next_session_id";
const SELECTED_WORKSPACE_ID_KEY: &str = "selected_workspace_id";
const SELECTED_SESSION_ID_KEY: &str = "selected_session_id";
const SELECTED_REPO_PATH_KEY: &str = "selected_repo_path";

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/0001_init.sql"
        )),
    ),
    (
        2,
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/0002_workspace_pending_changes.sql"
        )),
    ),
    (
        3,
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/0003_app_settings_text.sql"
        )),
    ),
];

/// Handle to a dedicated sqlite worker thread. Cloning shares the worker.
#[derive(Clone)]
pub struct SqliteStore {
    tx: mpsc::Sender<DbCommand>,
}

enum DbCommand {
    LoadAppState {
        reply: mpsc::Sender<anyhow::Result<Option<PersistedAppState>>>,
    },
    SaveAppState {
        snapshot: Box<PersistedAppState>,
        reply: mpsc::Sender<anyhow::Result<()>>,
    },
}

impl SqliteStore {
    /// Spawns the worker. Opening the database happens on the worker, so an
    /// unusable file surfaces as an error on every later call instead of here.
    pub fn new(db_path: PathBuf) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<DbCommand>();

        std::thread::Builder::new()
            .name("neovate-sqlite".to_owned())
            .spawn(move || {
                let mut db = SqliteDatabase::open(&db_path);
                while let Ok(cmd) = rx.recv() {
                    match (&mut db, cmd) {
                        (Ok(db), DbCommand::LoadAppState { reply }) => {
                            let _ = reply.send(db.load_app_state());
                        }
                        (Ok(db), DbCommand::SaveAppState { snapshot, reply }) => {
                            let _ = reply.send(db.save_app_state(&snapshot));
                        }
                        (Err(err), cmd) => respond_db_open_error(err, cmd),
                    }
                }
            })
            .context("failed to spawn sqlite worker")?;

        Ok(Self { tx })
    }

    /// Returns `Ok(None)` when no snapshot has ever been saved.
    pub fn load_app_state(&self) -> anyhow::Result<Option<PersistedAppState>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::LoadAppState { reply: reply_tx })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }

    pub fn save_app_state(&self, snapshot: PersistedAppState) -> anyhow::Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::SaveAppState {
                snapshot: Box::new(snapshot),
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }
}

fn respond_db_open_error(err: &anyhow::Error, cmd: DbCommand) {
    let message = format!("{err:#}");
    match cmd {
        DbCommand::LoadAppState { reply } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
        DbCommand::SaveAppState { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
    }
}

struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut conn = Connection::open(db_path)
            .with_context(|| format!("failed to open sqlite db {}", db_path.display()))?;

        configure_connection(&mut conn).context("failed to configure sqlite connection")?;
        apply_migrations(&mut conn).context("failed to apply sqlite migrations")?;

        Ok(Self { conn })
    }

    fn load_app_state(&mut self) -> anyhow::Result<Option<PersistedAppState>> {
        if get_setting(&self.conn, SNAPSHOT_SAVED_AT_KEY)?.is_none() {
            return Ok(None);
        }

        let mut repos = Vec::new();
        let mut repo_index: HashMap<String, usize> = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT path, name FROM repos ORDER BY position ASC, path ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (path, name) = row?;
                repo_index.insert(path.clone(), repos.len());
                repos.push(PersistedRepo {
                    path: PathBuf::from(path),
                    name,
                    workspaces: Vec::new(),
                });
            }
        }

        // workspace id -> (repo, workspace) position
        let mut workspace_index: HashMap<u64, (usize, usize)> = HashMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT id, repo_path, branch, pending_changes_json
                 FROM workspaces ORDER BY position ASC, id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    stored_u64(row, 0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                let (id, repo_path, branch, pending_changes_json) =
                    row.context("invalid workspace row")?;
                let pending_changes: Vec<PersistedPendingChange> =
                    serde_json::from_str(&pending_changes_json).with_context(|| {
                        format!("invalid pending changes for workspace {id}")
                    })?;
                let Some(&repo_pos) = repo_index.get(&repo_path) else {
                    continue;
                };
                let workspaces = &mut repos[repo_pos].workspaces;
                workspace_index.insert(id, (repo_pos, workspaces.len()));
                workspaces.push(PersistedWorkspace {
                    id,
                    branch,
                    pending_changes,
                    sessions: Vec::new(),
                });
            }
        }

        let mut session_index: HashMap<u64, (usize, usize, usize)> = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT id, workspace_id FROM sessions ORDER BY id ASC")?;
            let rows = stmt.query_map([], |row| Ok((stored_u64(row, 0)?, stored_u64(row, 1)?)))?;
            for row in rows {
                let (id, workspace_id) = row.context("invalid session row")?;
                let Some(&(repo_pos, workspace_pos)) = workspace_index.get(&workspace_id) else {
                    continue;
                };
                let sessions = &mut repos[repo_pos].workspaces[workspace_pos].sessions;
                session_index.insert(id, (repo_pos, workspace_pos, sessions.len()));
                sessions.push(PersistedSession {
                    id,
                    messages: Vec::new(),
                });
            }
        }

        {
            let mut stmt = self.conn.prepare(
                "SELECT session_id, role, content, timestamp_unix_ms
                 FROM messages ORDER BY session_id ASC, seq ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    stored_u64(row, 0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    stored_u64(row, 3)?,
                ))
            })?;
            for row in rows {
                let (session_id, role, content, timestamp_unix_ms) =
                    row.context("invalid message row")?;
                let role = MessageRole::parse(&role)
                    .ok_or_else(|| anyhow!("unknown message role: {role}"))?;
                let Some(&(r, w, s)) = session_index.get(&session_id) else {
                    continue;
                };
                repos[r].workspaces[w].sessions[s]
                    .messages
                    .push(PersistedMessage {
                        role,
                        content,
                        timestamp_unix_ms,
                    });
            }
        }

        let setting_u64 = |key: &str| -> anyhow::Result<Option<u64>> {
            get_setting(&self.conn, key)?
                .map(|v| {
                    u64::try_from(v).with_context(|| format!("invalid setting {key}: {v}"))
                })
                .transpose()
        };

        Ok(Some(PersistedAppState {
            repos,
            selected_repo_path: get_setting_text(&self.conn, SELECTED_REPO_PATH_KEY)?
                .map(PathBuf::from),
            selected_workspace_id: setting_u64(SELECTED_WORKSPACE_ID_KEY)?,
            selected_session_id: setting_u64(SELECTED_SESSION_ID_KEY)?,
            next_workspace_id: setting_u64(NEXT_WORKSPACE_ID_KEY)?.unwrap_or(1),
            next_session_id: setting_u64(NEXT_SESSION_ID_KEY)?.unwrap_or(1),
        }))
    }

    fn save_app_state(&mut self, snapshot: &PersistedAppState) -> anyhow::Result<()> {
        let now = now_unix_seconds();
        let tx = self.conn.transaction()?;

        let repo_paths: HashSet<String> = snapshot
            .repos
            .iter()
            .map(|r| r.path.to_string_lossy().into_owned())
            .collect();
        let workspace_ids: HashSet<u64> = snapshot
            .repos
            .iter()
            .flat_map(|r| r.workspaces.iter().map(|w| w.id))
            .collect();
        let session_ids: HashSet<u64> = snapshot
            .repos
            .iter()
            .flat_map(|r| r.workspaces.iter())
            .flat_map(|w| w.sessions.iter().map(|s| s.id))
            .collect();

        for path in existing_keys::<String>(&tx, "SELECT path FROM repos")? {
            if !repo_paths.contains(&path) {
                tx.execute("DELETE FROM repos WHERE path = ?1", params![path])?;
            }
        }
        for id in existing_keys::<i64>(&tx, "SELECT id FROM workspaces")? {
            if !workspace_ids.contains(&(id as u64)) {
                tx.execute("DELETE FROM workspaces WHERE id = ?1", params![id])?;
            }
        }
        for id in existing_keys::<i64>(&tx, "SELECT id FROM sessions")? {
            if !session_ids.contains(&(id as u64)) {
                tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            }
        }

        for (repo_position, repo) in snapshot.repos.iter().enumerate() {
            let repo_path = repo.path.to_string_lossy().into_owned();
            tx.execute(
                "INSERT INTO repos (path, name, position, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(path) DO UPDATE SET
                   name = excluded.name,
                   position = excluded.position,
                   updated_at = excluded.updated_at",
                params![repo_path, repo.name, repo_position as i64, now],
            )?;

            for (workspace_position, workspace) in repo.workspaces.iter().enumerate() {
                let pending_changes_json = serde_json::to_string(&workspace.pending_changes)
                    .context("failed to encode pending changes")?;
                tx.execute(
                    "INSERT INTO workspaces (id, repo_path, branch, position, pending_changes_json, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                       repo_path = excluded.repo_path,
                       branch = excluded.branch,
                       position = excluded.position,
                       pending_changes_json = excluded.pending_changes_json,
                       updated_at = excluded.updated_at",
                    params![
                        workspace.id as i64,
                        repo_path,
                        workspace.branch,
                        workspace_position as i64,
                        pending_changes_json,
                        now,
                    ],
                )?;

                for session in &workspace.sessions {
                    tx.execute(
                        "INSERT INTO sessions (id, workspace_id, created_at)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(id) DO UPDATE SET workspace_id = excluded.workspace_id",
                        params![session.id as i64, workspace.id as i64, now],
                    )?;
                    save_messages(&tx, session)?;
                }
            }
        }

        set_setting(
            &tx,
            NEXT_WORKSPACE_ID_KEY,
            Some(snapshot.next_workspace_id as i64),
            now,
        )?;
        set_setting(
            &tx,
            NEXT_SESSION_ID_KEY,
            Some(snapshot.next_session_id as i64),
            now,
        )?;
        set_setting(
            &tx,
            SELECTED_WORKSPACE_ID_KEY,
            snapshot.selected_workspace_id.map(|v| v as i64),
            now,
        )?;
        set_setting(
            &tx,
            SELECTED_SESSION_ID_KEY,
            snapshot.selected_session_id.map(|v| v as i64),
            now,
        )?;
        let selected_repo_path = snapshot
            .selected_repo_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        set_setting_text(
            &tx,
            SELECTED_REPO_PATH_KEY,
            selected_repo_path.as_deref(),
            now,
        )?;
        set_setting(&tx, SNAPSHOT_SAVED_AT_KEY, Some(now), now)?;

        tx.commit()?;
        Ok(())
    }
}

/// Messages are append-only, so only the tail past the stored count is
/// written. A shorter snapshot truncates.
fn save_messages(tx: &Transaction<'_>, session: &PersistedSession) -> anyhow::Result<()> {
    let stored: i64 = tx.query_row(
        "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
        params![session.id as i64],
        |row| row.get(0),
    )?;
    let stored = stored.max(0) as usize;

    if stored > session.messages.len() {
        tx.execute(
            "DELETE FROM messages WHERE session_id = ?1 AND seq >= ?2",
            params![session.id as i64, session.messages.len() as i64],
        )?;
    }

    for (seq, message) in session.messages.iter().enumerate().skip(stored) {
        tx.execute(
            "INSERT INTO messages (session_id, seq, role, content, timestamp_unix_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id as i64,
                seq as i64,
                message.role.as_str(),
                message.content,
                message.timestamp_unix_ms as i64,
            ],
        )?;
    }
    Ok(())
}

/// Ids and timestamps are stored as INTEGER; anything negative is corruption.
fn stored_u64(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value = row.get::<_, i64>(idx)?;
    u64::try_from(value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            Box::new(err),
        )
    })
}

fn existing_keys<T: rusqlite::types::FromSql>(
    tx: &Transaction<'_>,
    sql: &str,
) -> anyhow::Result<Vec<T>> {
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, T>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn get_setting(conn: &Connection, key: &str) -> anyhow::Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT value FROM app_settings WHERE key = ?1",
            params![key],
            |row| row.get::<_, i64>(0),
        )
        .optional()?)
}

fn get_setting_text(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM app_settings_text WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}

fn set_setting(
    tx: &Transaction<'_>,
    key: &str,
    value: Option<i64>,
    now: i64,
) -> anyhow::Result<()> {
    match value {
        Some(value) => {
            tx.execute(
                "INSERT INTO app_settings (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
        }
        None => {
            tx.execute("DELETE FROM app_settings WHERE key = ?1", params![key])?;
        }
    }
    Ok(())
}

fn set_setting_text(
    tx: &Transaction<'_>,
    key: &str,
    value: Option<&str>,
    now: i64,
) -> anyhow::Result<()> {
    match value {
        Some(value) => {
            tx.execute(
                "INSERT INTO app_settings_text (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
        }
        None => {
            tx.execute("DELETE FROM app_settings_text WHERE key = ?1", params![key])?;
        }
    }
    Ok(())
}

fn configure_connection(conn: &mut Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
    .context("failed to apply sqlite PRAGMAs")?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> anyhow::Result<()> {
    let current: u32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
        .context("failed to read user_version")? as u32;

    if current > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "sqlite schema version is newer than this build: db={}, app={}",
            current,
            LATEST_SCHEMA_VERSION
        ));
    }

    if current == LATEST_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to begin migration transaction")?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply migration v{version:04}"))?;
        tx.pragma_update(None, "user_version", *version as i64)
            .context("failed to update user_version")?;
    }

    // Dropping `tx` on an early return rolls the partial migration back.
    tx.commit()
        .context("failed to commit migration transaction")?;
    Ok(())
}

fn now_unix_seconds() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use neovate_domain::PendingChangeKind;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_db_path(test_name: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let mut dir = std::env::temp_dir();
        dir.push("neovate-tests");
        let _ = std::fs::create_dir_all(&dir);
        dir.push(format!(
            "{test_name}-{}-{}-{}.db",
            std::process::id(),
            now_unix_seconds(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        dir
    }

    fn open_db(path: &Path) -> SqliteDatabase {
        SqliteDatabase::open(path).unwrap()
    }

    fn user_version(db: &SqliteDatabase) -> u32 {
        let version: i64 = db
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        version as u32
    }

    fn message(role: MessageRole, content: &str, ts: u64) -> PersistedMessage {
        PersistedMessage {
            role,
            content: content.to_owned(),
            timestamp_unix_ms: ts,
        }
    }

    fn sample_snapshot() -> PersistedAppState {
        PersistedAppState {
            repos: vec![
                PersistedRepo {
                    path: PathBuf::from("/tmp/neovate"),
                    name: "neovate".to_owned(),
                    workspaces: vec![
                        PersistedWorkspace {
                            id: 1,
                            branch: "main".to_owned(),
                            pending_changes: vec![PersistedPendingChange {
                                path: "src/lib.rs".to_owned(),
                                kind: PendingChangeKind::Modified,
                            }],
                            sessions: vec![PersistedSession {
                                id: 1,
                                messages: vec![
                                    message(MessageRole::User, "hello", 10),
                                    message(MessageRole::Assistant, "Echo: hello", 11),
                                ],
                            }],
                        },
                        PersistedWorkspace {
                            id: 2,
                            branch: "feature".to_owned(),
                            pending_changes: Vec::new(),
                            sessions: Vec::new(),
                        },
                    ],
                },
                PersistedRepo {
                    path: PathBuf::from("/tmp/empty"),
                    name: "empty".to_owned(),
                    workspaces: Vec::new(),
                },
            ],
            selected_repo_path: Some(PathBuf::from("/tmp/neovate")),
            selected_workspace_id: Some(1),
            selected_session_id: Some(1),
            next_workspace_id: 3,
            next_session_id: 2,
        }
    }

    #[test]
    fn migrations_create_schema() {
        let path = temp_db_path("migrations_create_schema");
        let db = open_db(&path);

        let count: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('repos','workspaces','sessions','messages','app_settings','app_settings_text')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 6);
        assert_eq!(user_version(&db), LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn migrations_reopen_does_not_fail() {
        let path = temp_db_path("migrations_reopen_does_not_fail");
        {
            let _db = open_db(&path);
        }

        let db = open_db(&path);
        assert_eq!(user_version(&db), LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn migrations_upgrade_v1_database_in_place() {
        let path = temp_db_path("migrations_upgrade_v1_database_in_place");
        {
            let mut conn = Connection::open(&path).unwrap();
            configure_connection(&mut conn).unwrap();
            conn.execute_batch(MIGRATIONS[0].1).unwrap();
            conn.pragma_update(None, "user_version", 1i64).unwrap();
            conn.execute(
                "INSERT INTO repos (path, name, position, created_at, updated_at)
                 VALUES ('/tmp/old', 'old', 0, 0, 0)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO workspaces (id, repo_path, branch, position, created_at, updated_at)
                 VALUES (7, '/tmp/old', 'main', 0, 0, 0)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO app_settings (key, value, updated_at) VALUES (?1, 1, 0)",
                params![SNAPSHOT_SAVED_AT_KEY],
            )
            .unwrap();
        }

        let mut db = open_db(&path);
        assert_eq!(user_version(&db), LATEST_SCHEMA_VERSION);

        let loaded = db.load_app_state().unwrap().unwrap();
        assert_eq!(loaded.repos.len(), 1);
        assert_eq!(loaded.repos[0].workspaces[0].id, 7);
        assert!(loaded.repos[0].workspaces[0].pending_changes.is_empty());
        assert_eq!(loaded.selected_repo_path, None);
    }

    #[test]
    fn newer_schema_version_is_rejected() {
        let path = temp_db_path("newer_schema_version_is_rejected");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", (LATEST_SCHEMA_VERSION + 1) as i64)
                .unwrap();
        }

        let err = SqliteDatabase::open(&path).err().expect("open should fail");
        assert!(
            format!("{err:#}").contains("newer than this build"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn fresh_database_loads_none() {
        let path = temp_db_path("fresh_database_loads_none");
        let mut db = open_db(&path);
        assert_eq!(db.load_app_state().unwrap(), None);
    }

    #[test]
    fn save_and_load_app_state_roundtrips() {
        let path = temp_db_path("save_and_load_app_state_roundtrips");
        let snapshot = sample_snapshot();
        {
            let mut db = open_db(&path);
            db.save_app_state(&snapshot).unwrap();
        }

        let mut db = open_db(&path);
        assert_eq!(db.load_app_state().unwrap(), Some(snapshot));
    }

    #[test]
    fn empty_snapshot_is_distinguished_from_never_saved() {
        let path = temp_db_path("empty_snapshot_is_distinguished_from_never_saved");
        let mut db = open_db(&path);
        db.save_app_state(&PersistedAppState::default()).unwrap();

        let loaded = db.load_app_state().unwrap().unwrap();
        assert!(loaded.repos.is_empty());
        assert_eq!(loaded.selected_repo_path, None);
    }

    #[test]
    fn saving_removes_deleted_entities_and_clears_selection() {
        let path = temp_db_path("saving_removes_deleted_entities_and_clears_selection");
        let mut db = open_db(&path);
        db.save_app_state(&sample_snapshot()).unwrap();

        let mut next = sample_snapshot();
        next.repos.remove(0);
        next.selected_repo_path = None;
        next.selected_workspace_id = None;
        next.selected_session_id = None;
        db.save_app_state(&next).unwrap();

        assert_eq!(db.load_app_state().unwrap(), Some(next));
        let messages: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(messages, 0);
        let sessions: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sessions, 0);
    }

    #[test]
    fn appended_messages_are_written_incrementally() {
        let path = temp_db_path("appended_messages_are_written_incrementally");
        let mut db = open_db(&path);
        let mut snapshot = sample_snapshot();
        db.save_app_state(&snapshot).unwrap();

        snapshot.repos[0].workspaces[0].sessions[0]
            .messages
            .push(message(MessageRole::User, "again", 12));
        db.save_app_state(&snapshot).unwrap();

        let loaded = db.load_app_state().unwrap().unwrap();
        let messages = &loaded.repos[0].workspaces[0].sessions[0].messages;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, "again");
    }

    #[test]
    fn store_handle_reports_open_errors_per_call() {
        let path = temp_db_path("store_handle_reports_open_errors_per_call");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99i64).unwrap();
        }

        let store = SqliteStore::new(path).unwrap();
        assert!(store.load_app_state().is_err());
        assert!(store.save_app_state(PersistedAppState::default()).is_err());
    }

    fn saved_db_with(test_name: &str, corrupt_sql: &str) -> SqliteDatabase {
        let path = temp_db_path(test_name);
        let mut db = open_db(&path);
        db.save_app_state(&sample_snapshot()).unwrap();
        db.conn.execute_batch(corrupt_sql).unwrap();
        db
    }

    #[test]
    fn negative_workspace_id_is_a_load_error() {
        let mut db = saved_db_with(
            "negative_workspace_id_is_a_load_error",
            "INSERT INTO workspaces (id, repo_path, branch, position, created_at, updated_at)
             VALUES (-1, '/tmp/neovate', 'broken', 9, 0, 0);",
        );
        let err = db.load_app_state().err().expect("load should fail");
        assert!(
            format!("{err:#}").contains("invalid workspace row"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn negative_timestamp_and_setting_are_load_errors() {
        let mut db = saved_db_with(
            "negative_timestamp_is_a_load_error",
            "UPDATE messages SET timestamp_unix_ms = -5 WHERE seq = 0;",
        );
        assert!(db.load_app_state().is_err());

        let mut db = saved_db_with(
            "negative_setting_is_a_load_error",
            "UPDATE app_settings SET value = -1 WHERE key = 'next_session_id';",
        );
        let err = db.load_app_state().err().expect("load should fail");
        assert!(
            format!("{err:#}").contains("next_session_id"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn saving_over_corrupt_rows_repairs_the_database() {
        let mut db = saved_db_with(
            "saving_over_corrupt_rows_repairs_the_database",
            "INSERT INTO workspaces (id, repo_path, branch, position, created_at, updated_at)
             VALUES (-1, '/tmp/neovate', 'broken', 9, 0, 0);",
        );
        assert!(db.load_app_state().is_err());

        db.save_app_state(&sample_snapshot()).unwrap();
        assert_eq!(db.load_app_state().unwrap(), Some(sample_snapshot()));
    }

    #[test]
    fn failed_migration_rolls_back() {
        let path = temp_db_path("failed_migration_rolls_back");
        let mut conn = Connection::open(&path).unwrap();
        configure_connection(&mut conn).unwrap();
        conn.execute_batch(MIGRATIONS[0].1).unwrap();
        conn.pragma_update(None, "user_version", 1i64).unwrap();
        conn.execute_batch(
            "ALTER TABLE workspaces ADD COLUMN pending_changes_json TEXT NOT NULL DEFAULT '[]';",
        )
        .unwrap();

        let err = apply_migrations(&mut conn).err().expect("migration should fail");
        assert!(
            format!("{err:#}").contains("migration v0002"),
            "unexpected error: {err:#}"
        );
        assert!(conn.is_autocommit());
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'app_settings_text'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }
}
