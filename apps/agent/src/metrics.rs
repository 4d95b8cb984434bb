//! Host and device metrics for the agent's heartbeat/device_metrics
//! payloads. Adapted from the teacher's hardware monitor: direct
//! `/sys`/`/proc` reads with a synthetic-temperature fallback for
//! hypervisors that don't expose thermal sensors.

use std::fs;

use kh_models::DeviceInfo;

#[derive(Debug, Clone, Copy)]
pub struct HostMetrics {
    pub cpu_frequency_mhz: u32,
    pub load_average: f32,
    pub core_temperature_celsius: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    /// True when the temperature reading is estimated rather than read
    /// from a physical sensor (common on VM/container hosts).
    pub is_synthetic_temperature: bool,
}

pub fn capture() -> HostMetrics {
    let load_average = read_load_average();
    let (temperature, is_synthetic) = read_temperature(load_average);
    let (used, total) = read_memory_bytes();
    HostMetrics {
        cpu_frequency_mhz: read_cpu_frequency_mhz(),
        load_average,
        core_temperature_celsius: temperature,
        memory_used_bytes: used,
        memory_total_bytes: total,
        is_synthetic_temperature: is_synthetic,
    }
}

/// A single `DeviceInfo` entry representing the host CPU, for agents
/// with no GPU attached or as one entry among several.
pub fn host_device_info(metrics: &HostMetrics) -> DeviceInfo {
    DeviceInfo {
        device_id: 0,
        name: "host-cpu".to_string(),
        device_type: "cpu".to_string(),
        temperature_celsius: Some(metrics.core_temperature_celsius),
        utilization_percent: Some((metrics.load_average * 100.0).min(100.0)),
    }
}

fn read_cpu_frequency_mhz() -> u32 {
    fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq")
        .unwrap_or_else(|_| "0".to_string())
        .trim()
        .parse::<u32>()
        .map(|khz| khz / 1000)
        .unwrap_or(0)
}

fn read_load_average() -> f32 {
    fs::read_to_string("/proc/loadavg")
        .unwrap_or_default()
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f32>().ok())
        .unwrap_or(0.0)
}

/// Physical thermal_zone0 reading, falling back to hwmon, falling back
/// to a load-driven estimate: `40.0 + min(load * 20.0, 50.0)`.
fn read_temperature(load_average: f32) -> (f32, bool) {
    for path in ["/sys/class/thermal/thermal_zone0/temp", "/sys/class/hwmon/hwmon0/temp1_input"] {
        if let Ok(content) = fs::read_to_string(path) {
            if let Ok(millidegrees) = content.trim().parse::<f32>() {
                if millidegrees > 0.0 {
                    return (millidegrees / 1000.0, false);
                }
            }
        }
    }
    (40.0 + (load_average * 20.0).min(50.0), true)
}

fn read_memory_bytes() -> (u64, u64) {
    let Ok(content) = fs::read_to_string("/proc/meminfo") else {
        return (0, 0);
    };
    let mut total_kb = 0u64;
    let mut available_kb = 0u64;
    for line in content.lines() {
        if line.starts_with("MemTotal:") {
            total_kb = parse_kb_value(line);
        }
        if line.starts_with("MemAvailable:") {
            available_kb = parse_kb_value(line);
        }
    }
    if available_kb == 0 {
        return (total_kb / 2 * 1024, total_kb * 1024);
    }
    (total_kb.saturating_sub(available_kb) * 1024, total_kb * 1024)
}

fn parse_kb_value(line: &str) -> u64 {
    line.split_whitespace().nth(1).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_does_not_panic_on_any_host() {
        let metrics = capture();
        assert!(metrics.core_temperature_celsius >= 0.0);
    }

    #[test]
    fn synthetic_temperature_scales_with_load() {
        let (t_idle, synthetic) = read_temperature(0.0);
        let (t_busy, _) = read_temperature(10.0);
        if synthetic {
            assert!(t_busy >= t_idle);
        }
    }
}
