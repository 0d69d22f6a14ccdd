//! LD_PRELOAD interposition library for devjail's network restrictor.
//!
//! Exports the libc socket-creation entry points (`socket`, `socketpair`,
//! `connect`, `accept`, `accept4`). Each intercepted call appends one event
//! record to the JSONL stream named by `DEVJAIL_NET_EVENTS`, sets
//! `errno = EPERM` and returns `-1` without performing the real call.
//!
//! The library never calls through to the real symbols, so no network
//! socket can be created for the lifetime of the process it is loaded
//! into. Only dynamically linked targets are covered; statically linked
//! binaries bypass `LD_PRELOAD` entirely (the runner documents this).

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;

use libc::{c_int, size_t, sockaddr, socklen_t};
use serde::Serialize;

/// Environment variable naming the side file events are appended to.
pub const EVENTS_ENV: &str = "DEVJAIL_NET_EVENTS";

/// Maximum rendered length for any single argument string.
const ARG_RENDER_LIMIT: usize = 120;

/// Number of backtrace lines kept in the event's stack snippet.
const STACK_SNIPPET_LINES: usize = 6;

/// One intercepted socket call.
///
/// Mirrors the record the runner folds into the net-restriction log.
#[derive(Debug, Serialize)]
pub struct SocketEvent {
    pub timestamp: String,
    pub api: String,
    pub args: Vec<String>,
    pub stack: Vec<String>,
}

impl SocketEvent {
    pub fn new(api: &str, args: Vec<String>) -> Self {
        Self {
            timestamp: utc_timestamp(),
            api: api.to_string(),
            args,
            stack: stack_snippet(),
        }
    }
}

/// Compact UTC timestamp (`YYYYmmddTHHMMSSZ`), formatted without
/// allocating through higher-level time crates.
fn utc_timestamp() -> String {
    let mut tm = unsafe { std::mem::zeroed::<libc::tm>() };
    let now = unsafe { libc::time(std::ptr::null_mut()) };
    unsafe { libc::gmtime_r(&now, &mut tm) };

    let mut out = String::with_capacity(17);
    let _ = write!(
        out,
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    );
    out
}

/// Short call-stack snippet for attribution. Capture failures yield an
/// empty snippet rather than disturbing the intercepted call.
fn stack_snippet() -> Vec<String> {
    let bt = std::backtrace::Backtrace::force_capture().to_string();
    bt.lines()
        .map(|l| truncate(l.trim(), ARG_RENDER_LIMIT))
        .take(STACK_SNIPPET_LINES)
        .collect()
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() > limit {
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    } else {
        s.to_string()
    }
}

/// Append one event to the stream named by `DEVJAIL_NET_EVENTS`.
///
/// Every failure path is swallowed: the deny verdict must stand even
/// when the event cannot be recorded.
fn record(event: &SocketEvent) {
    let Ok(path) = std::env::var(EVENTS_ENV) else {
        return;
    };
    let Ok(line) = serde_json::to_string(event) else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
        let _ = writeln!(file, "{}", line);
    }
}

fn set_errno_eperm() {
    #[cfg(target_os = "linux")]
    unsafe {
        *libc::__errno_location() = libc::EPERM;
    }
    #[cfg(target_os = "macos")]
    unsafe {
        *libc::__error() = libc::EPERM;
    }
}

/// Record the call, set `errno`, return the permission-denied sentinel.
fn deny(api: &str, args: Vec<String>) -> c_int {
    record(&SocketEvent::new(api, args));
    set_errno_eperm();
    -1
}

/// Render the address family out of a sockaddr without trusting more of
/// the caller's buffer than the length it claimed.
fn render_sockaddr(addr: *const sockaddr, len: socklen_t) -> String {
    if addr.is_null() || (len as usize) < std::mem::size_of::<libc::sa_family_t>() {
        return "addr=<null>".to_string();
    }
    let family = unsafe { (*addr).sa_family };
    format!("family={}, addrlen={}", family, len)
}

// ── Interposed entry points ──────────────────────────────────────────

/// # Safety
/// Matches the libc `socket(2)` ABI; never dereferences caller memory.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn socket(domain: c_int, ty: c_int, protocol: c_int) -> c_int {
    deny(
        "socket",
        vec![
            format!("domain={}", domain),
            format!("type={}", ty),
            format!("protocol={}", protocol),
        ],
    )
}

/// # Safety
/// Matches the libc `socketpair(2)` ABI; `sv` is never written.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn socketpair(
    domain: c_int,
    ty: c_int,
    protocol: c_int,
    _sv: *mut c_int,
) -> c_int {
    deny(
        "socketpair",
        vec![
            format!("domain={}", domain),
            format!("type={}", ty),
            format!("protocol={}", protocol),
        ],
    )
}

/// # Safety
/// Matches the libc `connect(2)` ABI; reads at most `sa_family` from
/// `addr`, guarded by the caller-supplied length.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn connect(sockfd: c_int, addr: *const sockaddr, addrlen: socklen_t) -> c_int {
    deny(
        "connect",
        vec![
            format!("sockfd={}", sockfd),
            render_sockaddr(addr, addrlen),
        ],
    )
}

/// # Safety
/// Matches the libc `accept(2)` ABI; caller buffers are never written.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn accept(
    sockfd: c_int,
    _addr: *mut sockaddr,
    _addrlen: *mut socklen_t,
) -> c_int {
    deny("accept", vec![format!("sockfd={}", sockfd)])
}

/// # Safety
/// Matches the libc `accept4(2)` ABI; caller buffers are never written.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn accept4(
    sockfd: c_int,
    _addr: *mut sockaddr,
    _addrlen: *mut socklen_t,
    flags: c_int,
) -> c_int {
    deny(
        "accept4",
        vec![format!("sockfd={}", sockfd), format!("flags={}", flags)],
    )
}

// `sendto` on an unconnected datagram socket can implicitly reach the
// network without a prior `connect`; deny it as well so UDP does not
// slip through the fd-adoption gap.
/// # Safety
/// Matches the libc `sendto(2)` ABI; the payload buffer is never read.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sendto(
    sockfd: c_int,
    _buf: *const libc::c_void,
    len: size_t,
    flags: c_int,
    addr: *const sockaddr,
    addrlen: socklen_t,
) -> libc::ssize_t {
    record(&SocketEvent::new(
        "sendto",
        vec![
            format!("sockfd={}", sockfd),
            format!("len={}", len),
            format!("flags={}", flags),
            render_sockaddr(addr, addrlen),
        ],
    ));
    set_errno_eperm();
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_expected_fields() {
        let event = SocketEvent::new("socket", vec!["domain=2".into(), "type=1".into()]);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"api\":\"socket\""));
        assert!(json.contains("domain=2"));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn timestamp_is_compact_utc() {
        let ts = utc_timestamp();
        assert_eq!(ts.len(), 16);
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(100);
        let out = truncate(&s, 7);
        assert!(out.ends_with('…'));
        assert!(out.len() <= 7 + '…'.len_utf8());
    }

    #[test]
    fn null_sockaddr_rendered_safely() {
        assert_eq!(render_sockaddr(std::ptr::null(), 0), "addr=<null>");
    }

    // Both env-mutating tests share one lock; cargo runs tests in
    // parallel threads and EVENTS_ENV is process-global.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn intercepted_call_denies_and_appends_exactly_one_event() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = std::env::temp_dir().join(format!("devjail-shim-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let events = dir.join("events.jsonl");
        unsafe { std::env::set_var(EVENTS_ENV, &events) };

        let rc = unsafe { socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        assert_eq!(rc, -1);
        assert_eq!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(libc::EPERM)
        );

        let content = std::fs::read_to_string(&events).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1, "exactly one event per intercepted call");
        let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["api"], "socket");

        unsafe { std::env::remove_var(EVENTS_ENV) };
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_event_stream_still_denies() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::remove_var(EVENTS_ENV) };
        let rc = unsafe { socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, std::ptr::null_mut()) };
        assert_eq!(rc, -1);
    }
}
