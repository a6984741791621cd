// swarm-autoscaler: Container utilization math
//
// Works on a single runtime stats snapshot, which carries the current and
// previous CPU counters (`cpu_stats` / `precpu_stats`). All accessors fail
// soft to zero: the decision engine treats 0.0 as "no data".

use bollard::models::ContainerStatsResponse;

/// CPU utilization percentage for one container.
///
/// `cpu_quota` is the service's CPU limit in fractional CPUs (0.5 = half a
/// core). When positive, the result is normalized so 100% means the
/// container saturated its quota; otherwise it is a per-core average in
/// [0, 100].
pub fn cpu_percent(stats: &ContainerStatsResponse, cpu_quota: f64) -> f64 {
    let cpu = match stats.cpu_stats.as_ref() {
        Some(cpu) => cpu,
        None => return 0.0,
    };
    let precpu = match stats.precpu_stats.as_ref() {
        Some(precpu) => precpu,
        None => return 0.0,
    };

    let total = cpu
        .cpu_usage
        .as_ref()
        .and_then(|u| u.total_usage)
        .unwrap_or_default();
    let pre_total = precpu
        .cpu_usage
        .as_ref()
        .and_then(|u| u.total_usage)
        .unwrap_or_default();
    let cpu_delta = total.saturating_sub(pre_total) as f64;

    let system = cpu.system_cpu_usage.unwrap_or_default();
    let pre_system = precpu.system_cpu_usage.unwrap_or_default();
    let system_delta = system.saturating_sub(pre_system) as f64;

    let cpus = online_cpus(cpu);

    let mut percent = 0.0;
    if cpu_delta > 0.0 && system_delta > 0.0 {
        percent = (cpu_delta / system_delta) * cpus * 100.0;
    }

    if cpu_quota > 0.0 {
        percent / cpu_quota
    } else if cpus > 0.0 {
        percent / cpus
    } else {
        percent
    }
}

/// Memory utilization percentage: usage over limit, 0 when no limit is set.
pub fn memory_percent(stats: &ContainerStatsResponse) -> f64 {
    let memory = match stats.memory_stats.as_ref() {
        Some(memory) => memory,
        None => return 0.0,
    };
    let usage = memory.usage.unwrap_or_default() as f64;
    let limit = memory.limit.unwrap_or_default() as f64;
    if limit <= 0.0 {
        return 0.0;
    }
    (usage / limit) * 100.0
}

/// CPU quota in fractional CPUs from the service's NanoCPUs limit.
pub fn cpu_quota_fraction(nano_cpus: i64) -> f64 {
    nano_cpus as f64 / 1e9
}

fn online_cpus(cpu: &bollard::models::ContainerCpuStats) -> f64 {
    let count = cpu.online_cpus.map(u64::from).unwrap_or_else(|| {
        cpu.cpu_usage
            .as_ref()
            .and_then(|u| u.percpu_usage.as_ref())
            .map(|v| v.len() as u64)
            .unwrap_or_default()
    });
    if count == 0 {
        1.0
    } else {
        count as f64
    }
}
