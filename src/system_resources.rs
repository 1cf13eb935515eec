use sysinfo::{System, SystemExt};

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Memory figures of the host, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemResources {
    pub ram_total_bytes: u64,
    pub ram_available_bytes: u64,
}

impl SystemResources {
    pub fn snapshot() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            ram_total_bytes: sys.total_memory(),
            ram_available_bytes: sys.available_memory(),
        }
    }

    pub fn ram_available_gib(&self) -> f64 {
        self.ram_available_bytes as f64 / BYTES_PER_GIB
    }

    /// Logs a warning when `bytes_needed` exceeds the available memory.
    /// Returns whether it fits. Some platforms report zero, which is treated as unknown.
    pub fn warn_if_insufficient(&self, bytes_needed: u64) -> bool {
        if self.ram_available_bytes == 0 {
            log::debug!("Available memory unknown, skipping headroom check");
            return true;
        }
        let fits = bytes_needed <= self.ram_available_bytes;
        if fits {
            log::info!(
                "Model needs {:.2} GiB, {:.2} GiB available",
                bytes_needed as f64 / BYTES_PER_GIB,
                self.ram_available_gib()
            );
        } else {
            log::warn!(
                "Model needs {:.2} GiB but only {:.2} GiB of memory is available; loading may fail or swap",
                bytes_needed as f64 / BYTES_PER_GIB,
                self.ram_available_gib()
            );
        }
        fits
    }
}

impl Default for SystemResources {
    fn default() -> Self {
        Self::snapshot()
    }
}
