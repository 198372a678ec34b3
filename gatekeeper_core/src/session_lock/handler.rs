use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::{GateError, GateResult};

/// A stateful client bound to one session file. Only one process may drive a
/// session at a time.
#[async_trait]
pub trait SessionClient: Send + Sync {
    fn session_path(&self) -> &Path;
    async fn start(&mut self) -> GateResult<()>;
    async fn stop(&mut self) -> GateResult<()>;
}

/// Hands out exclusive ownership of session files. Acquisition fails fast with
/// `LockContention` instead of waiting.
#[derive(Debug, Clone)]
pub struct SessionLockManager {
    stale_after: Duration,
}

/// Held lock. Dropping it removes the lock file, which covers normal return,
/// `?` propagation, unwinding and cancellation of the owning future. A lock
/// that was reclaimed by another process in the meantime is left alone.
#[derive(Debug)]
pub struct SessionLockGuard {
    lock_path: PathBuf,
    token: String,
}

impl Drop for SessionLockGuard {
    fn drop(&mut self) {
        match fs::read_to_string(&self.lock_path) {
            Ok(content)
                if LockRecord::parse(&content).is_some_and(|record| record.token == self.token) =>
            {
                if let Err(e) = fs::remove_file(&self.lock_path) {
                    if e.kind() != ErrorKind::NotFound {
                        log::error!("Failed to release session lock {}: {}", self.lock_path.display(), e);
                    }
                }
            }
            Ok(_) => {
                log::warn!(
                    "Session lock {} now belongs to another holder, leaving it",
                    self.lock_path.display()
                );
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                log::error!("Failed to read session lock {}: {}", self.lock_path.display(), e);
            }
        }
    }
}

impl SessionLockGuard {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Contents of a lock file: holder pid, acquisition time and a per-acquisition token.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LockRecord {
    pid: u32,
    acquired_at: i64,
    token: String,
}

impl LockRecord {
    fn new() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now().timestamp(),
            token: Uuid::new_v4().to_string(),
        }
    }

    fn parse(content: &str) -> Option<Self> {
        let mut lines = content.lines().map(str::trim);
        let pid = lines.next()?.parse::<u32>().ok()?;
        let acquired_at = lines.next()?.parse::<i64>().ok()?;
        let token = lines.next().filter(|token| !token.is_empty())?.to_string();

        Some(Self {
            pid,
            acquired_at,
            token,
        })
    }

    fn render(&self) -> String {
        format!("{}\n{}\n{}\n", self.pid, self.acquired_at, self.token)
    }
}

fn lock_path_for(session_path: &Path) -> PathBuf {
    let mut name = session_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn sibling_path(lock_path: &Path, suffix: &str) -> PathBuf {
    let mut name = lock_path.as_os_str().to_os_string();
    name.push(format!(".{}.{}", Uuid::new_v4(), suffix));
    PathBuf::from(name)
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Default for SessionLockManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

impl SessionLockManager {
    pub fn new(stale_after: Duration) -> Self {
        Self { stale_after }
    }

    pub fn try_acquire(&self, session_path: &Path) -> GateResult<SessionLockGuard> {
        let lock_path = lock_path_for(session_path);

        match self.create_lock_file(&lock_path) {
            Ok(guard) => Ok(guard),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let Some(observed) = self.stale_content(&lock_path) else {
                    return Err(contention(&lock_path));
                };

                self.reclaim(&lock_path, &observed)?;
                self.create_lock_file(&lock_path).map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => contention(&lock_path),
                    _ => GateError::Io(e),
                })
            }
            Err(e) => Err(GateError::Io(e)),
        }
    }

    /// Writes the record to a private file first and links it into place, so
    /// the lock path never exists half-written. `hard_link` fails with
    /// `AlreadyExists` when someone else holds the lock.
    fn create_lock_file(&self, lock_path: &Path) -> std::io::Result<SessionLockGuard> {
        let record = LockRecord::new();
        let pending = sibling_path(lock_path, "pending");

        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&pending)
            .and_then(|mut file| {
                file.write_all(record.render().as_bytes())?;
                file.sync_all()
            });

        let linked = written.and_then(|_| fs::hard_link(&pending, lock_path));

        if let Err(e) = fs::remove_file(&pending) {
            if e.kind() != ErrorKind::NotFound {
                log::warn!("Failed to remove {}: {}", pending.display(), e);
            }
        }

        linked.map(|_| SessionLockGuard {
            lock_path: lock_path.to_path_buf(),
            token: record.token,
        })
    }

    /// Returns the lock file's content when the lock may be reclaimed: its
    /// holder process is gone or it outlived `stale_after`. Content that cannot
    /// be parsed only counts as stale once the file itself is older than `stale_after`.
    fn stale_content(&self, lock_path: &Path) -> Option<String> {
        let content = fs::read_to_string(lock_path).ok()?;

        let stale = match LockRecord::parse(&content) {
            Some(record) => {
                let age = Utc::now().timestamp().saturating_sub(record.acquired_at);
                !process_alive(record.pid) || age > self.stale_after.as_secs() as i64
            }
            None => fs::metadata(lock_path)
                .and_then(|metadata| metadata.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age > self.stale_after),
        };

        stale.then_some(content)
    }

    /// Moves the stale lock aside and checks it is the one that was judged
    /// stale. A lock that was replaced in between is put back.
    fn reclaim(&self, lock_path: &Path, observed: &str) -> GateResult<()> {
        let evicted = sibling_path(lock_path, "stale");

        match fs::rename(lock_path, &evicted) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(GateError::Io(e)),
        }

        let moved = fs::read_to_string(&evicted).unwrap_or_default();
        if moved != observed {
            if let Err(e) = fs::hard_link(&evicted, lock_path) {
                log::warn!("Could not restore session lock {}: {}", lock_path.display(), e);
            }
            let _ = fs::remove_file(&evicted);
            return Err(contention(lock_path));
        }

        log::warn!("Reclaimed stale session lock {}", lock_path.display());
        fs::remove_file(&evicted)?;
        Ok(())
    }

    /// Runs `operation` with exclusive use of `client`'s session. The client is
    /// stopped after the operation whether it failed or not, then the lock is released.
    pub async fn run_exclusive<C, T, F>(&self, client: &mut C, operation: F) -> GateResult<T>
    where
        C: SessionClient + ?Sized,
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, GateResult<T>>,
    {
        let _guard = self.try_acquire(client.session_path())?;

        client.start().await?;
        let outcome = operation(&mut *client).await;

        if let Err(e) = client.stop().await {
            log::error!(
                "Failed to stop session client {}: {}",
                client.session_path().display(),
                e
            );
        }

        outcome
    }
}

fn contention(lock_path: &Path) -> GateError {
    GateError::LockContention(lock_path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FakeClient {
        path: PathBuf,
        started: bool,
        stops: u32,
    }

    #[async_trait]
    impl SessionClient for FakeClient {
        fn session_path(&self) -> &Path {
            &self.path
        }

        async fn start(&mut self) -> GateResult<()> {
            self.started = true;
            Ok(())
        }

        async fn stop(&mut self) -> GateResult<()> {
            self.started = false;
            self.stops += 1;
            Ok(())
        }
    }

    fn session(temp: &TempDir) -> PathBuf {
        temp.path().join("indexer.session")
    }

    #[test]
    fn test_second_acquirer_fails_fast() {
        let temp = TempDir::new().unwrap();
        let manager = SessionLockManager::default();

        let guard = manager.try_acquire(&session(&temp)).unwrap();
        let second = manager.try_acquire(&session(&temp));
        assert!(matches!(second, Err(GateError::LockContention(_))));

        drop(guard);
        assert!(manager.try_acquire(&session(&temp)).is_ok());
    }

    #[test]
    fn test_dead_holder_lock_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let manager = SessionLockManager::default();
        let lock_path = lock_path_for(&session(&temp));

        fs::write(
            &lock_path,
            format!("{}\n{}\nold\n", u32::MAX, Utc::now().timestamp() - 7200),
        )
        .unwrap();

        let guard = manager.try_acquire(&session(&temp)).unwrap();
        let content = fs::read_to_string(guard.lock_path()).unwrap();
        assert!(content.starts_with(&std::process::id().to_string()));
    }

    #[test]
    fn test_expired_lock_of_live_process_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let manager = SessionLockManager::new(Duration::from_secs(60));
        let lock_path = lock_path_for(&session(&temp));

        fs::write(
            &lock_path,
            format!("{}\n{}\nold\n", std::process::id(), Utc::now().timestamp() - 3600),
        )
        .unwrap();

        assert!(manager.try_acquire(&session(&temp)).is_ok());
    }

    #[test]
    fn test_half_written_lock_is_contention() {
        let temp = TempDir::new().unwrap();
        let manager = SessionLockManager::default();
        let lock_path = lock_path_for(&session(&temp));

        fs::write(&lock_path, "").unwrap();

        let result = manager.try_acquire(&session(&temp));
        assert!(matches!(result, Err(GateError::LockContention(_))));
        assert!(lock_path.exists());
    }

    #[test]
    fn test_old_unreadable_lock_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let manager = SessionLockManager::new(Duration::ZERO);
        let lock_path = lock_path_for(&session(&temp));

        fs::write(&lock_path, "garbage").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let guard = manager.try_acquire(&session(&temp)).unwrap();
        let record = LockRecord::parse(&fs::read_to_string(&lock_path).unwrap()).unwrap();
        assert_eq!(record.token, guard.token());
    }

    #[test]
    fn test_lock_file_holds_owner_token() {
        let temp = TempDir::new().unwrap();
        let guard = SessionLockManager::default().try_acquire(&session(&temp)).unwrap();

        let record = LockRecord::parse(&fs::read_to_string(guard.lock_path()).unwrap()).unwrap();
        assert_eq!(record.pid, std::process::id());
        assert_eq!(record.token, guard.token());

        let leftovers = fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_reclaimed_lock_survives_previous_holder_drop() {
        let temp = TempDir::new().unwrap();
        let manager = SessionLockManager::default();
        let lock_path = lock_path_for(&session(&temp));

        let first = manager.try_acquire(&session(&temp)).unwrap();
        fs::write(
            &lock_path,
            format!(
                "{}\n{}\n{}\n",
                std::process::id(),
                Utc::now().timestamp() - 7200,
                first.token()
            ),
        )
        .unwrap();

        let second = manager.try_acquire(&session(&temp)).unwrap();
        drop(first);

        assert!(lock_path.exists());
        let third = manager.try_acquire(&session(&temp));
        assert!(matches!(third, Err(GateError::LockContention(_))));

        drop(second);
        assert!(!lock_path.exists());
    }

    #[tokio::test]
    async fn test_run_exclusive_releases_on_error() {
        let temp = TempDir::new().unwrap();
        let manager = SessionLockManager::default();
        let mut client = FakeClient {
            path: session(&temp),
            started: false,
            stops: 0,
        };

        let result: GateResult<()> = manager
            .run_exclusive(&mut client, |client| {
                Box::pin(async move {
                    assert!(client.started);
                    Err(GateError::Transport("upstream down".to_string()))
                })
            })
            .await;

        assert!(matches!(result, Err(GateError::Transport(_))));
        assert_eq!(client.stops, 1);
        assert!(!lock_path_for(&session(&temp)).exists());
    }

    #[tokio::test]
    async fn test_cancelled_run_releases_lock() {
        let temp = TempDir::new().unwrap();
        let manager = SessionLockManager::default();
        let mut client = FakeClient {
            path: session(&temp),
            started: false,
            stops: 0,
        };

        let run = manager.run_exclusive(&mut client, |_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(50), run).await;

        assert!(timed_out.is_err());
        assert!(!lock_path_for(&session(&temp)).exists());
        assert!(manager.try_acquire(&session(&temp)).is_ok());
    }
}
