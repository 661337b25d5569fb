use std::ffi::OsString;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Deserialize;

#[cfg(windows)]
use std::os::windows::fs::MetadataExt;
#[cfg(windows)]
use windows_sys::Win32::Security::{CheckTokenMembership, CreateWellKnownSid, SECURITY_MAX_SID_SIZE, WinBuiltinAdministratorsSid};
#[cfg(windows)]
use windows_sys::Win32::Storage::FileSystem::FILE_ATTRIBUTE_REPARSE_POINT;

pub const SYSTEM_TEMP_DIR: &str = r"C:\Windows\Temp";
pub const PREFETCH_DIR: &str = r"C:\Windows\Prefetch";

pub const MSG_START: &str = "Starting temp and cache cleanup...";
pub const MSG_NOT_ELEVATED: &str = "Administrator privileges are required. Please re-run this program as Administrator.";
pub const MSG_COMPLETE: &str = "Cleanup complete.";
pub const MSG_PAUSE: &str = "Press Enter to exit . . . ";

// ---------- Targets ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    UserTemp,
    SystemTemp,
    Prefetch,
    RecentItems,
}

impl TargetKind {
    pub fn label(self) -> &'static str {
        match self {
            TargetKind::UserTemp => "user temp",
            TargetKind::SystemTemp => "system temp",
            TargetKind::Prefetch => "prefetch cache",
            TargetKind::RecentItems => "recent items",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeMode {
    /// Remove the directory itself together with everything below it.
    Recursive,
    /// Remove only the files directly inside the directory.
    FilesOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub kind: TargetKind,
    /// `None` when the location could not be resolved from the environment.
    pub path: Option<PathBuf>,
    pub mode: PurgeMode,
}

/// The fixed, ordered list of locations a run visits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupPlan {
    pub targets: Vec<Target>,
}

impl CleanupPlan {
    pub fn new(
        user_temp: Option<PathBuf>,
        system_temp: Option<PathBuf>,
        prefetch: Option<PathBuf>,
        recent_items: Option<PathBuf>,
    ) -> Self {
        let targets = vec![
            Target { kind: TargetKind::UserTemp, path: user_temp, mode: PurgeMode::Recursive },
            Target { kind: TargetKind::SystemTemp, path: system_temp, mode: PurgeMode::Recursive },
            Target { kind: TargetKind::Prefetch, path: prefetch, mode: PurgeMode::FilesOnly },
            Target { kind: TargetKind::RecentItems, path: recent_items, mode: PurgeMode::Recursive },
        ];
        Self { targets }
    }

    /// Resolve the standard locations: %TEMP% (or %TMP%), the Windows temp and
    /// prefetch folders, and %APPDATA%\Microsoft\Windows\Recent.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var_os(name))
    }

    /// Same as [`CleanupPlan::from_env`] with an explicit variable lookup.
    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let lookup = |name: &str| var(name).filter(|v| !v.is_empty()).map(PathBuf::from);
        let user_temp = lookup("TEMP").or_else(|| lookup("TMP"));
        let recent = lookup("APPDATA").map(|p| p.join("Microsoft").join("Windows").join("Recent"));
        Self::new(
            user_temp,
            Some(PathBuf::from(SYSTEM_TEMP_DIR)),
            Some(PathBuf::from(PREFETCH_DIR)),
            recent,
        )
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from)
}

// ---------- Config ----------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)] pub verbose: bool,
    #[serde(default)] pub quiet: bool,
    #[serde(default)] pub exact_stats: bool,
    #[serde(default = "true_bool")] pub pause: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { verbose: false, quiet: false, exact_stats: false, pause: true }
    }
}

impl Config {
    /// Apply `ZENTIFY_PURGE_*` environment toggles on top of file settings.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    /// Same as [`Config::apply_env`] with an explicit variable lookup.
    pub fn apply_vars<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| var(name).is_some_and(|v| is_truthy(&v));
        if set("ZENTIFY_PURGE_EXACT_STATS") { self.exact_stats = true; }
        if set("ZENTIFY_PURGE_NO_PAUSE") { self.pause = false; }
    }
}

/// Result of the config search. Logging is usually not set up yet when the
/// config is read, so rejected files are reported back instead of logged.
#[derive(Debug, Default)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: Option<PathBuf>,
    pub rejected: Vec<String>,
}

pub fn config_search_paths() -> Vec<PathBuf> {
    // Search order: CWD/.zentify/purge.json, %PROGRAMDATA%/Zentify/purge.json, %APPDATA%/Zentify/purge.json
    let mut paths: Vec<PathBuf> = Vec::new();
    if let Ok(cwd) = std::env::current_dir() { paths.push(cwd.join(".zentify").join("purge.json")); }
    if let Some(pd) = env_path("ProgramData") { paths.push(pd.join("Zentify").join("purge.json")); }
    if let Some(ad) = env_path("APPDATA") { paths.push(ad.join("Zentify").join("purge.json")); }
    paths
}

pub fn load_config() -> LoadedConfig {
    load_config_from(&config_search_paths())
}

pub fn load_config_from(paths: &[PathBuf]) -> LoadedConfig {
    let mut loaded = LoadedConfig::default();
    for p in paths {
        if !p.is_file() { continue; }
        let parsed = fs::read_to_string(p)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<Config>(&s).map_err(|e| e.to_string()));
        match parsed {
            Ok(c) => {
                loaded.config = c;
                loaded.source = Some(p.clone());
                return loaded;
            }
            Err(e) => loaded.rejected.push(format!("{}: {}", p.display(), e)),
        }
    }
    loaded
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn true_bool() -> bool { true }

// ---------- Stats ----------

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stats {
    pub files_deleted: u64,
    pub dirs_deleted: u64,
    pub links_removed: u64,
    pub bytes_freed: u64,
    /// Items that could not be removed (locked, access denied, ...).
    pub failed: u64,
}

impl Stats {
    fn add_file(&mut self, bytes: u64) {
        self.files_deleted += 1;
        self.bytes_freed = self.bytes_freed.saturating_add(bytes);
    }

    fn add_failure(&mut self, path: &Path, err: &io::Error) {
        debug!("Could not remove {}: {}", path.display(), err);
        self.failed += 1;
    }
}

#[derive(Debug, Clone)]
pub struct Summary {
    pub stats: Stats,
    pub elapsed: Duration,
    pub exact_stats: bool,
}

impl Summary {
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let s = &self.stats;
        writeln!(
            out,
            "Summary: removed {} files, {} dirs, {} links; freed {} ({} bytes) in {:?}; {} items could not be removed.",
            s.files_deleted,
            s.dirs_deleted,
            s.links_removed,
            format_bytes(s.bytes_freed),
            s.bytes_freed,
            self.elapsed,
            s.failed
        )?;
        if !self.exact_stats {
            writeln!(out, "Note: byte counts are approximate (fast mode). Use --exact-stats for precise totals.")?;
        }
        Ok(())
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 { format!("{} {}", bytes, UNITS[unit]) } else { format!("{:.2} {}", size, UNITS[unit]) }
}

// ---------- Purge operations ----------

/// Remove `dir` and everything below it, best-effort.
///
/// A missing directory is not an error. Items that cannot be removed are
/// counted in `stats.failed` and skipped; the rest of the tree is still
/// processed. Links (symlinks, junctions) are unlinked and never followed.
pub fn purge_dir(dir: &Path, exact_stats: bool, stats: &mut Stats) {
    // Never operate on filesystem roots (e.g., C:\)
    if dir.parent().is_none() {
        warn!("Refusing to purge filesystem root {}", dir.display());
        return;
    }
    if is_link(dir) {
        match remove_link(dir) {
            Ok(()) => stats.links_removed += 1,
            Err(e) => stats.add_failure(dir, &e),
        }
        return;
    }
    if !dir.is_dir() {
        debug!("{} does not exist, nothing to purge", dir.display());
        return;
    }

    // Exact mode walks the tree so every removed item is counted
    if !exact_stats {
        set_writable(dir);
        match fs::remove_dir_all(dir) {
            Ok(()) => {
                // Fast mode only knows that the root is gone
                stats.dirs_deleted += 1;
                return;
            }
            Err(e) => debug!("Fast removal of {} failed ({}), cleaning entry by entry", dir.display(), e),
        }
    }
    purge_tree(dir, stats);
}

fn purge_tree(dir: &Path, stats: &mut Stats) {
    let failed_before = stats.failed;
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            stats.add_failure(dir, &e);
            return;
        }
    };
    for e in rd.flatten() {
        let p = e.path();
        if is_link(&p) {
            match remove_link(&p) {
                Ok(()) => stats.links_removed += 1,
                Err(err) => stats.add_failure(&p, &err),
            }
        } else if p.is_dir() {
            purge_tree(&p, stats);
        } else {
            remove_file_counted(&p, stats);
        }
    }
    set_writable(dir);
    match fs::remove_dir(dir) {
        Ok(()) => stats.dirs_deleted += 1,
        // Already accounted for by the entry that could not be removed
        Err(e) if stats.failed > failed_before => debug!("Keeping non-empty {}: {}", dir.display(), e),
        Err(e) => stats.add_failure(dir, &e),
    }
}

/// Delete the files directly inside `dir`, best-effort.
///
/// The directory itself and any subdirectories (with their contents) are
/// left in place.
pub fn purge_files(dir: &Path, stats: &mut Stats) {
    if !dir.is_dir() {
        debug!("{} does not exist, nothing to purge", dir.display());
        return;
    }
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            stats.add_failure(dir, &e);
            return;
        }
    };
    for e in rd.flatten() {
        let p = e.path();
        // Follows links on purpose: links to directories count as directories
        if p.is_dir() { continue; }
        if is_link(&p) {
            match fs::remove_file(&p) {
                Ok(()) => stats.links_removed += 1,
                Err(err) => stats.add_failure(&p, &err),
            }
        } else {
            remove_file_counted(&p, stats);
        }
    }
}

fn remove_file_counted(p: &Path, stats: &mut Stats) {
    let size = fs::symlink_metadata(p).map(|m| m.len()).unwrap_or(0);
    set_writable(p);
    match fs::remove_file(p) {
        Ok(()) => stats.add_file(size),
        Err(e) => stats.add_failure(p, &e),
    }
}

fn remove_link(p: &Path) -> io::Result<()> {
    fs::remove_dir(p).or_else(|_| fs::remove_file(p))
}

#[cfg(windows)]
fn is_link(p: &Path) -> bool {
    match fs::symlink_metadata(p) {
        Ok(md) => (md.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT) != 0,
        Err(_) => false,
    }
}

#[cfg(not(windows))]
fn is_link(p: &Path) -> bool {
    fs::symlink_metadata(p).map(|md| md.file_type().is_symlink()).unwrap_or(false)
}

#[allow(clippy::permissions_set_readonly_false)]
fn set_writable(path: &Path) {
    if let Ok(metadata) = fs::metadata(path) {
        let mut perms = metadata.permissions();
        if perms.readonly() {
            // Ignore errors: best-effort
            perms.set_readonly(false);
            let _ = fs::set_permissions(path, perms);
        }
    }
}

// ---------- Runner ----------

#[derive(Debug)]
pub enum Outcome {
    /// The privilege gate failed; nothing was touched.
    NotElevated,
    Completed(Summary),
}

/// Run the plan in order. Status lines go to `out`; deletion failures never
/// stop the run, only a failing `out` does.
pub fn run_cleanup<W: Write>(plan: &CleanupPlan, elevated: bool, cfg: &Config, out: &mut W) -> io::Result<Outcome> {
    writeln!(out, "{}", MSG_START)?;
    if !elevated {
        warn!("Process is not elevated, aborting before any deletion");
        writeln!(out, "{}", MSG_NOT_ELEVATED)?;
        return Ok(Outcome::NotElevated);
    }

    let start = Instant::now();
    let mut stats = Stats::default();
    for target in &plan.targets {
        let label = target.kind.label();
        let path = match &target.path {
            Some(p) => p,
            None => {
                warn!("Could not resolve the {} location, skipping", label);
                if !cfg.quiet { writeln!(out, "Skipping {}: location could not be resolved", label)?; }
                continue;
            }
        };
        if !cfg.quiet { writeln!(out, "Cleaning {}: {}", label, path.display())?; }
        let before = stats.clone();
        match target.mode {
            PurgeMode::Recursive => purge_dir(path, cfg.exact_stats, &mut stats),
            PurgeMode::FilesOnly => purge_files(path, &mut stats),
        }
        info!(
            "{}: {} files, {} dirs, {} links removed; {} failures",
            label,
            stats.files_deleted - before.files_deleted,
            stats.dirs_deleted - before.dirs_deleted,
            stats.links_removed - before.links_removed,
            stats.failed - before.failed
        );
    }

    let summary = Summary { stats, elapsed: start.elapsed(), exact_stats: cfg.exact_stats };
    if !cfg.quiet { summary.write_to(out)?; }
    writeln!(out, "{}", MSG_COMPLETE)?;
    Ok(Outcome::Completed(summary))
}

/// Block until the user presses Enter (or input is closed).
pub fn pause<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> io::Result<()> {
    write!(out, "\n{}", MSG_PAUSE)?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(())
}

// ---------- Elevation (Windows) ----------

#[cfg(windows)]
pub fn is_elevated() -> bool {
    unsafe {
        // Build the SID for the built-in Administrators group and check membership
        let mut sid = [0u8; SECURITY_MAX_SID_SIZE as usize];
        let mut sid_size: u32 = SECURITY_MAX_SID_SIZE;
        let sid_ptr = sid.as_mut_ptr() as *mut core::ffi::c_void;
        if CreateWellKnownSid(WinBuiltinAdministratorsSid, std::ptr::null_mut(), sid_ptr, &mut sid_size) == 0 {
            return false;
        }
        let mut is_member: i32 = 0;
        if CheckTokenMembership(std::ptr::null_mut(), sid_ptr, &mut is_member) == 0 {
            return false;
        }
        is_member != 0
    }
}

#[cfg(not(windows))]
pub fn is_elevated() -> bool { false }

// ---------- Tests ----------
