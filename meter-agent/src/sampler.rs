use meter_metrics::{GaugeType, MetricSample};
use rand::Rng;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Lower bound of the `RandomValue` gauge.
const RANDOM_MIN: GaugeType = 1e-307;
/// Upper bound (exclusive) of the `RandomValue` gauge.
const RANDOM_MAX: GaugeType = 1e308;

/// Memory figures of the agent process, in bytes.
#[derive(Clone, Copy, Debug, Default)]
struct ProcessStats {
    resident: u64,
    virtual_memory: u64,
    run_time: u64,
}

/// Heap figures of the allocator, in bytes.
#[derive(Clone, Copy, Debug, Default)]
struct HeapStats {
    allocated: u64,
    active: u64,
    resident: u64,
    mapped: u64,
    retained: u64,
    metadata: u64,
}

impl HeapStats {
    /// Approximates heap figures from the process memory when allocator statistics are missing.
    fn from_process(process: ProcessStats) -> Self {
        Self {
            allocated: process.resident,
            active: process.resident,
            resident: process.resident,
            mapped: process.virtual_memory,
            retained: 0,
            metadata: 0,
        }
    }

    #[cfg(target_os = "linux")]
    fn read() -> Result<Self, tikv_jemalloc_ctl::Error> {
        use tikv_jemalloc_ctl::{epoch, stats};

        // jemalloc caches its statistics until the epoch advances.
        epoch::advance()?;

        Ok(Self {
            allocated: stats::allocated::read()? as u64,
            active: stats::active::read()? as u64,
            resident: stats::resident::read()? as u64,
            mapped: stats::mapped::read()? as u64,
            retained: stats::retained::read()? as u64,
            metadata: stats::metadata::read()? as u64,
        })
    }
}

/// Reads runtime statistics of the agent process and the host.
///
/// Every call to [`sample`](Self::sample) returns the full list of gauges, one `PollCount`
/// counter with a delta of one and a `RandomValue` gauge.
///
/// Heap gauges come from jemalloc on Linux, where the `meter` binary installs it as the global
/// allocator. Elsewhere they are derived from the process memory. Garbage collector statistics
/// have no counterpart and report `0`.
pub struct Sampler {
    system: System,
    pid: Option<Pid>,
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    allocator_stats: bool,
}

impl Sampler {
    /// Creates a sampler for the current process.
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(error) => {
                meter_log::warn!("process statistics unavailable: {error}");
                None
            }
        };

        Self {
            system: System::new(),
            pid,
            allocator_stats: cfg!(target_os = "linux"),
        }
    }

    fn heap_stats(&mut self, process: ProcessStats) -> HeapStats {
        #[cfg(target_os = "linux")]
        if self.allocator_stats {
            match HeapStats::read() {
                Ok(stats) => return stats,
                Err(error) => {
                    meter_log::warn!("allocator statistics unavailable: {error}");
                    self.allocator_stats = false;
                }
            }
        }

        HeapStats::from_process(process)
    }

    fn process_stats(&mut self) -> ProcessStats {
        let Some(pid) = self.pid else {
            return ProcessStats::default();
        };

        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        self.system
            .process(pid)
            .map(|process| ProcessStats {
                resident: process.memory(),
                virtual_memory: process.virtual_memory(),
                run_time: process.run_time(),
            })
            .unwrap_or_default()
    }

    /// Takes one sample of all statistics.
    pub fn sample(&mut self) -> Vec<MetricSample> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();
        let process = self.process_stats();

        let heap = self.heap_stats(process);
        let gauge = |bytes: u64| bytes as GaugeType;

        let gauges = [
            ("Alloc", gauge(heap.allocated)),
            ("BuckHashSys", 0.0),
            ("Frees", 0.0),
            ("GCCPUFraction", 0.0),
            ("GCSys", 0.0),
            ("HeapAlloc", gauge(heap.allocated)),
            ("HeapIdle", gauge(heap.mapped.saturating_sub(heap.active))),
            ("HeapInuse", gauge(heap.active)),
            ("HeapObjects", 0.0),
            ("HeapReleased", gauge(heap.retained)),
            ("HeapSys", gauge(heap.mapped)),
            ("LastGC", 0.0),
            ("Lookups", 0.0),
            ("MCacheInuse", 0.0),
            ("MCacheSys", 0.0),
            ("MSpanInuse", gauge(heap.metadata)),
            ("MSpanSys", gauge(heap.metadata)),
            ("Mallocs", 0.0),
            ("NextGC", 0.0),
            ("NumForcedGC", 0.0),
            ("NumGC", 0.0),
            ("OtherSys", gauge(heap.resident.saturating_sub(heap.active))),
            ("PauseTotalNs", 0.0),
            ("StackInuse", 0.0),
            ("StackSys", 0.0),
            ("Sys", gauge(heap.mapped + heap.retained)),
            ("TotalAlloc", gauge(heap.allocated)),
            ("TotalMemory", self.system.total_memory() as GaugeType),
            ("FreeMemory", self.system.free_memory() as GaugeType),
            (
                "CPUutilization1",
                GaugeType::from(self.system.global_cpu_usage()),
            ),
        ];

        meter_log::trace!(uptime = process.run_time, "sampled runtime statistics");

        let random = rand::rng().random_range(RANDOM_MIN..RANDOM_MAX);

        gauges
            .into_iter()
            .chain([("RandomValue", random)])
            .filter_map(|(name, value)| MetricSample::gauge(name, value).ok())
            .chain(MetricSample::counter("PollCount", 1).ok())
            .collect()
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}
