//! Host command execution and privilege helpers.

pub mod executor;

/// True when running with effective uid 0.
pub fn is_elevated() -> bool {
    #[cfg(target_os = "linux")]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Identity the units should run as when none is given: the user who
/// invoked sudo, falling back to root.
pub fn default_run_as() -> String {
    std::env::var("SUDO_USER")
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "root".to_string())
}
