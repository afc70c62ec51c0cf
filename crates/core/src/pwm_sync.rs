//! PWM sync loop: mirror a motherboard fan duty to wireless modules.
//!
//! A long-running consumer of the wireless command path. Each cycle reads
//! the motherboard's current PWM duty through a sensor collaborator and
//! sends a PWM-target command to every listed module MAC, then sleeps for
//! the configured interval. The caller toggles the motherboard rpm-sync
//! flag on before entering the loop and restores it on exit, error exits
//! included; the loop itself never touches the flag.

use crate::error::{Error, Result};
use crate::retry::Sleeper;
use crate::transport::HidTransport;
use crate::wireless::WirelessTransceiver;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Reads the motherboard's fan duty and owns the host-side rpm-sync flag.
pub trait PwmSource {
    /// Current PWM duty, 0-255.
    fn read_duty(&self) -> Result<u8>;

    /// Toggle the motherboard rpm-sync flag so the board does not fight the
    /// override while the loop is active.
    fn set_rpm_sync(&self, enabled: bool) -> Result<()>;
}

/// Sysfs hwmon-backed source: reads a `pwmN` attribute and drives the paired
/// `pwmN_enable` (1 = manual/synced, 2 = board-automatic).
pub struct HwmonPwmSource {
    pwm_path: PathBuf,
}

impl HwmonPwmSource {
    pub fn new(pwm_path: impl Into<PathBuf>) -> Self {
        Self {
            pwm_path: pwm_path.into(),
        }
    }

    /// Pick the first hwmon channel that exposes both a `pwm1` attribute and
    /// its `pwm1_enable` switch.
    pub fn discover() -> Result<Self> {
        let root = Path::new("/sys/class/hwmon");
        let entries = fs::read_dir(root)
            .map_err(|e| Error::Hid(format!("read {}: {e}", root.display())))?;
        let mut names: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        names.sort();
        for dir in names {
            let pwm = dir.join("pwm1");
            if pwm.exists() && dir.join("pwm1_enable").exists() {
                debug!(path = %pwm.display(), "hwmon pwm channel selected");
                return Ok(Self::new(pwm));
            }
        }
        Err(Error::NoDevice(
            "no hwmon channel with a pwm1/pwm1_enable pair found".into(),
        ))
    }

    fn enable_path(&self) -> PathBuf {
        let mut name = self
            .pwm_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str("_enable");
        self.pwm_path.with_file_name(name)
    }

    fn read_trimmed(path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| Error::Hid(format!("read {}: {e}", path.display())))
    }
}

impl PwmSource for HwmonPwmSource {
    fn read_duty(&self) -> Result<u8> {
        let text = Self::read_trimmed(&self.pwm_path)?;
        let value: u64 = text.parse().map_err(|_| {
            Error::Decode(format!(
                "non-numeric pwm value '{text}' in {}",
                self.pwm_path.display()
            ))
        })?;
        Ok(value.min(255) as u8)
    }

    fn set_rpm_sync(&self, enabled: bool) -> Result<()> {
        let path = self.enable_path();
        let value = if enabled { "1" } else { "2" };
        fs::write(&path, value).map_err(|e| Error::Hid(format!("write {}: {e}", path.display())))
    }
}

/// Anything that can deliver a PWM-target command to a module MAC.
pub trait PwmSink {
    fn set_pwm(&mut self, mac: &str, duty: u8) -> Result<()>;
}

impl<T: HidTransport> PwmSink for WirelessTransceiver<T> {
    fn set_pwm(&mut self, mac: &str, duty: u8) -> Result<()> {
        WirelessTransceiver::set_pwm(self, mac, duty)
    }
}

/// Loop bounds and cadence.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Sleep between cycles.
    pub interval: Duration,
    /// Stop deterministically after this many cycles.
    pub max_cycles: Option<u64>,
    /// "Run once" mode: exactly one cycle, no sleep.
    pub stop_after_first_send: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_cycles: None,
            stop_after_first_send: false,
        }
    }
}

/// Cooperative cancellation checked around each sleep, so shutdown does not
/// wait out the interval.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the sync loop. Returns the number of completed cycles.
///
/// A failed send to one target is reported and the remaining targets still
/// receive the cycle's duty; a failed sensor read aborts the loop (the
/// caller restores the rpm-sync flag).
pub fn run_pwm_sync_loop(
    sink: &mut dyn PwmSink,
    source: &dyn PwmSource,
    targets: &[String],
    options: &SyncOptions,
    cancel: &CancelToken,
    sleeper: &dyn Sleeper,
) -> Result<u64> {
    if targets.is_empty() {
        return Err(Error::Usage("no sync targets given".into()));
    }

    let mut cycles = 0u64;
    while !cancel.is_cancelled() {
        let duty = source.read_duty()?;
        for mac in targets {
            if let Err(err) = sink.set_pwm(mac, duty) {
                warn!(mac = %mac, "pwm send failed, continuing: {err}");
            }
        }
        cycles += 1;
        debug!(cycles, duty, "pwm sync cycle complete");

        if options.stop_after_first_send {
            break;
        }
        if options.max_cycles.is_some_and(|max| cycles >= max) {
            break;
        }
        if cancel.is_cancelled() {
            break;
        }
        sleeper.sleep(options.interval);
    }
    Ok(cycles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::mock::RecordingSleeper;
    use std::sync::Mutex;

    struct FixedSource {
        duty: u8,
        sync_flag: Mutex<Vec<bool>>,
    }

    impl FixedSource {
        fn new(duty: u8) -> Self {
            Self {
                duty,
                sync_flag: Mutex::new(Vec::new()),
            }
        }
    }

    impl PwmSource for FixedSource {
        fn read_duty(&self) -> Result<u8> {
            Ok(self.duty)
        }

        fn set_rpm_sync(&self, enabled: bool) -> Result<()> {
            self.sync_flag.lock().unwrap().push(enabled);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sends: Vec<(String, u8)>,
        fail_macs: Vec<String>,
    }

    impl PwmSink for RecordingSink {
        fn set_pwm(&mut self, mac: &str, duty: u8) -> Result<()> {
            if self.fail_macs.iter().any(|m| m == mac) {
                return Err(Error::Hid("write failed".into()));
            }
            self.sends.push((mac.to_string(), duty));
            Ok(())
        }
    }

    fn targets(macs: &[&str]) -> Vec<String> {
        macs.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn once_mode_sends_one_cycle_per_target() {
        let mut sink = RecordingSink::default();
        let source = FixedSource::new(180);
        let options = SyncOptions {
            stop_after_first_send: true,
            ..SyncOptions::default()
        };
        let sleeper = RecordingSleeper::new();

        let cycles = run_pwm_sync_loop(
            &mut sink,
            &source,
            &targets(&["aa:bb:cc:dd:ee:ff", "de:ad:be:ef:00:01"]),
            &options,
            &CancelToken::new(),
            &sleeper,
        )
        .unwrap();

        assert_eq!(cycles, 1);
        assert_eq!(
            sink.sends,
            vec![
                ("aa:bb:cc:dd:ee:ff".to_string(), 180),
                ("de:ad:be:ef:00:01".to_string(), 180),
            ]
        );
        // Run-once never sleeps.
        assert!(sleeper.slept().is_empty());
    }

    #[test]
    fn max_cycles_bounds_the_loop() {
        let mut sink = RecordingSink::default();
        let source = FixedSource::new(90);
        let options = SyncOptions {
            interval: Duration::from_millis(250),
            max_cycles: Some(3),
            stop_after_first_send: false,
        };
        let sleeper = RecordingSleeper::new();

        let cycles = run_pwm_sync_loop(
            &mut sink,
            &source,
            &targets(&["aa:bb:cc:dd:ee:ff"]),
            &options,
            &CancelToken::new(),
            &sleeper,
        )
        .unwrap();

        assert_eq!(cycles, 3);
        assert_eq!(sink.sends.len(), 3);
        // Sleeps happen between cycles, not after the last one.
        assert_eq!(sleeper.slept(), vec![Duration::from_millis(250); 2]);
    }

    #[test]
    fn cancelled_token_stops_before_first_cycle() {
        let mut sink = RecordingSink::default();
        let source = FixedSource::new(90);
        let cancel = CancelToken::new();
        cancel.cancel();

        let cycles = run_pwm_sync_loop(
            &mut sink,
            &source,
            &targets(&["aa:bb:cc:dd:ee:ff"]),
            &SyncOptions::default(),
            &cancel,
            &RecordingSleeper::new(),
        )
        .unwrap();

        assert_eq!(cycles, 0);
        assert!(sink.sends.is_empty());
    }

    #[test]
    fn failed_target_does_not_abort_the_batch() {
        let mut sink = RecordingSink {
            fail_macs: vec!["aa:bb:cc:dd:ee:ff".into()],
            ..RecordingSink::default()
        };
        let source = FixedSource::new(64);
        let options = SyncOptions {
            stop_after_first_send: true,
            ..SyncOptions::default()
        };

        let cycles = run_pwm_sync_loop(
            &mut sink,
            &source,
            &targets(&["aa:bb:cc:dd:ee:ff", "de:ad:be:ef:00:01"]),
            &options,
            &CancelToken::new(),
            &RecordingSleeper::new(),
        )
        .unwrap();

        assert_eq!(cycles, 1);
        assert_eq!(sink.sends, vec![("de:ad:be:ef:00:01".to_string(), 64)]);
    }

    #[test]
    fn empty_targets_is_usage_error() {
        let mut sink = RecordingSink::default();
        let source = FixedSource::new(0);
        let result = run_pwm_sync_loop(
            &mut sink,
            &source,
            &[],
            &SyncOptions::default(),
            &CancelToken::new(),
            &RecordingSleeper::new(),
        );
        assert!(matches!(result, Err(Error::Usage(_))));
    }

    #[test]
    fn loop_never_touches_the_sync_flag() {
        let mut sink = RecordingSink::default();
        let source = FixedSource::new(10);
        let options = SyncOptions {
            stop_after_first_send: true,
            ..SyncOptions::default()
        };

        source.set_rpm_sync(true).unwrap();
        run_pwm_sync_loop(
            &mut sink,
            &source,
            &targets(&["aa:bb:cc:dd:ee:ff"]),
            &options,
            &CancelToken::new(),
            &RecordingSleeper::new(),
        )
        .unwrap();

        // Only the caller's toggle is recorded; the flag is still on when
        // the loop returns.
        assert_eq!(*source.sync_flag.lock().unwrap(), vec![true]);
    }

    #[test]
    fn hwmon_enable_path_derived_from_pwm_path() {
        let source = HwmonPwmSource::new("/sys/class/hwmon/hwmon2/pwm1");
        assert_eq!(
            source.enable_path(),
            PathBuf::from("/sys/class/hwmon/hwmon2/pwm1_enable")
        );
    }
}
