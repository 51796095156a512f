pub const MAX_BUILD_CONCURRENCY: usize = 32;

fn total_memory_gib_linux_best_effort() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in contents.lines() {
        let line = line.trim_start();
        if !line.starts_with("MemTotal:") {
            continue;
        }
        let kb = line
            .split_whitespace()
            .nth(1)
            .and_then(|v| v.parse::<u64>().ok())?;
        return Some(kb / 1024 / 1024);
    }
    None
}

/// Worker count for per-item embedding when nothing is configured.
#[must_use]
pub fn default_build_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let cpu_default = if cpus <= 4 {
        2
    } else if cpus <= 12 {
        4
    } else {
        8
    };

    let Some(mem_gib) = total_memory_gib_linux_best_effort() else {
        return cpu_default;
    };
    let mem_default = if mem_gib <= 8 { 2 } else { 8 };

    cpu_default.min(mem_default).max(1)
}

#[must_use]
pub fn clamp_build_concurrency(value: usize) -> usize {
    value.clamp(1, MAX_BUILD_CONCURRENCY)
}

/// Parse a configured concurrency; blank or malformed input falls back to
/// `default_value`. The result is always within `1..=MAX_BUILD_CONCURRENCY`.
#[must_use]
pub fn parse_build_concurrency(raw: Option<&str>, default_value: usize) -> usize {
    clamp_build_concurrency(
        raw.map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(default_value),
    )
}
