use derive_builder::Builder;

/// Umask assumed on hosts without one.
#[cfg(not(unix))]
const DEFAULT_UMASK: u32 = 0o022;

/// Settings a volume is mounted with.
///
/// ```rust
/// use exfat_volume::volume::MountOptionsBuilder;
///
/// let options = MountOptionsBuilder::default()
///     .dmask(0o022)
///     .fmask(0o133)
///     .read_only(true)
///     .build()
///     .unwrap();
///
/// assert!(options.read_only);
/// ```
#[derive(Builder, Copy, Clone, Debug, PartialEq, Eq)]
#[builder(derive(Debug))]
pub struct MountOptions {
    /// Permission bits cleared on directories.
    #[builder(default = "ProcessIdentity::current().umask & 0o777")]
    pub dmask: u32,
    /// Permission bits cleared on regular files.
    #[builder(default = "ProcessIdentity::current().umask & 0o777")]
    pub fmask: u32,
    #[builder(default = "ProcessIdentity::current().uid")]
    pub uid: u32,
    #[builder(default = "ProcessIdentity::current().gid")]
    pub gid: u32,
    /// Open the device read-only.
    #[builder(default)]
    pub read_only: bool,
    /// Never update access times.
    #[builder(default)]
    pub noatime: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self::from_identity(ProcessIdentity::current())
    }
}

impl MountOptions {
    fn from_identity(identity: ProcessIdentity) -> Self {
        Self {
            dmask: identity.umask & 0o777,
            fmask: identity.umask & 0o777,
            uid: identity.uid,
            gid: identity.gid,
            read_only: false,
            noatime: false,
        }
    }

    /// Parses a comma-separated option string such as `ro,uid=1000,dmask=022`.
    ///
    /// `umask`, `dmask` and `fmask` are octal, `uid` and `gid` decimal, `ro` and `noatime` are
    /// bare flags. The first occurrence of a key wins and unknown keys are ignored. Anything not
    /// given falls back to the process umask and effective ids.
    pub fn parse(options: &str) -> Self {
        let identity = ProcessIdentity::current();
        let umask = int_option(options, "umask", 8).unwrap_or(identity.umask);

        let parsed = Self {
            dmask: int_option(options, "dmask", 8).unwrap_or(umask) & 0o777,
            fmask: int_option(options, "fmask", 8).unwrap_or(umask) & 0o777,
            uid: int_option(options, "uid", 10).unwrap_or(identity.uid),
            gid: int_option(options, "gid", 10).unwrap_or(identity.gid),
            read_only: match_option(options, "ro"),
            noatime: match_option(options, "noatime"),
        };
        log::debug!("{options:?} -> {parsed:?}");
        parsed
    }
}

fn option_value<'a>(options: &'a str, name: &str) -> Option<&'a str> {
    options
        .split(',')
        .find_map(|item| item.strip_prefix(name)?.strip_prefix('='))
}

fn int_option(options: &str, name: &str, radix: u32) -> Option<u32> {
    let value = option_value(options, name)?;
    match u32::from_str_radix(value, radix) {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("ignoring malformed option `{name}={value}`: {e}");
            None
        }
    }
}

fn match_option(options: &str, name: &str) -> bool {
    options.split(',').any(|item| item == name)
}

/// Umask and effective ids of the running process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub umask: u32,
    pub uid: u32,
    pub gid: u32,
}

impl ProcessIdentity {
    pub fn current() -> Self {
        let umask = UmaskGuard::acquire().umask();

        #[cfg(unix)]
        // SAFETY: `geteuid` and `getegid` cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        #[cfg(not(unix))]
        let (uid, gid) = (0, 0);

        Self { umask, uid, gid }
    }
}

/// Reads the process umask by temporarily clearing it. The previous value is restored on drop.
pub struct UmaskGuard {
    previous: u32,
}

impl UmaskGuard {
    pub fn acquire() -> Self {
        #[cfg(unix)]
        // SAFETY: `umask` always succeeds and touches no memory.
        let previous = unsafe { libc::umask(0) } as u32;
        #[cfg(not(unix))]
        let previous = DEFAULT_UMASK;

        Self { previous }
    }

    /// The umask in effect before the guard was acquired.
    pub fn umask(&self) -> u32 {
        self.previous
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        // SAFETY: see `acquire`.
        unsafe {
            libc::umask(self.previous as libc::mode_t);
        }
    }
}

#[test]
fn parse_full() {
    let _lock = crate::testing::PROCESS_UMASK.lock().unwrap();
    let options = MountOptions::parse("uid=1000,gid=100,dmask=022,fmask=0133,ro,noatime");

    assert_eq!(
        options,
        MountOptions {
            dmask: 0o022,
            fmask: 0o133,
            uid: 1000,
            gid: 100,
            read_only: true,
            noatime: true,
        }
    );
}

#[test]
fn parse_defaults_to_process_identity() {
    let _lock = crate::testing::PROCESS_UMASK.lock().unwrap();
    let identity = ProcessIdentity::current();

    let options = MountOptions::parse("");

    assert_eq!(options, MountOptions::from_identity(identity));
    assert!(!options.read_only);
    assert!(!options.noatime);
}

#[test]
fn umask_seeds_both_masks() {
    let _lock = crate::testing::PROCESS_UMASK.lock().unwrap();
    let options = MountOptions::parse("umask=7777,fmask=644");

    // masks are limited to permission bits
    assert_eq!(options.dmask, 0o777);
    assert_eq!(options.fmask, 0o644);
}

#[test]
fn flags_match_whole_items_only() {
    let _lock = crate::testing::PROCESS_UMASK.lock().unwrap();
    let options = MountOptions::parse("rox,xro,noatimes,umask=0");
    assert!(!options.read_only);
    assert!(!options.noatime);

    let options = MountOptions::parse("umask=0,noatime,ro");
    assert!(options.read_only);
    assert!(options.noatime);
}

#[test]
fn first_occurrence_wins_and_unknown_keys_are_ignored() {
    let _lock = crate::testing::PROCESS_UMASK.lock().unwrap();
    let options = MountOptions::parse("fuid=5,uid=7,uid=9,iocharset=utf8,umask=0");

    assert_eq!(options.uid, 7);
    assert_eq!(options.dmask, 0);
}

#[test]
fn malformed_value_falls_back() {
    let _lock = crate::testing::PROCESS_UMASK.lock().unwrap();
    let identity = ProcessIdentity::current();

    let options = MountOptions::parse("uid=alice,dmask=9,umask=0");

    assert_eq!(options.uid, identity.uid);
    assert_eq!(options.dmask, 0);
}

#[test]
fn umask_is_restored() {
    let _lock = crate::testing::PROCESS_UMASK.lock().unwrap();
    let before = UmaskGuard::acquire().umask();
    let again = UmaskGuard::acquire().umask();

    assert_eq!(before, again);
}

#[test]
fn builder_defaults() {
    let _lock = crate::testing::PROCESS_UMASK.lock().unwrap();
    let identity = ProcessIdentity::current();

    let options = MountOptionsBuilder::default().uid(0).build().unwrap();

    assert_eq!(options.uid, 0);
    assert_eq!(options.gid, identity.gid);
    assert_eq!(options.dmask, identity.umask & 0o777);
    assert!(!options.read_only);
}
