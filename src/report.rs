//! Human-readable benchmark results.

use std::fmt;

use crate::measure::RunStatistics;

/// One benchmark's result line.
pub struct Report {
    pub name: &'static str,
    pub stats: RunStatistics,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}':\t{:4} frames in {:1.6} seconds => {:2.6} ms/frame ({:5.2} FPS)",
            self.name,
            self.stats.frames,
            self.stats.wall_seconds,
            self.stats.ms_per_frame(),
            self.stats.frames_per_second()
        )?;
        if let Some(ms) = self.stats.mean_device_ms() {
            write!(f, ", gpu time: {ms:2.6} ms")?;
        }
        Ok(())
    }
}

/// Table of every result plus the benchmarks that could not run.
#[derive(Default)]
pub struct Summary {
    rows: Vec<Report>,
    skipped: Vec<(&'static str, String)>,
}

impl Summary {
    pub fn push(&mut self, report: Report) {
        self.rows.push(report);
    }

    pub fn skip(&mut self, name: &'static str, reason: impl Into<String>) {
        self.skipped.push((name, reason.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.skipped.is_empty()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:-<76}", "")?;
        writeln!(
            f,
            "{:<30} {:>15} {:>15} {:>13}",
            "Benchmark", "ms/frame", "FPS", "GPU (ms)"
        )?;
        writeln!(f, "{:-<76}", "")?;
        for row in &self.rows {
            let gpu = row
                .stats
                .mean_device_ms()
                .map_or_else(|| "-".to_owned(), |ms| format!("{ms:.3}"));
            writeln!(
                f,
                "{:<30} {:>15.3} {:>15.2} {:>13}",
                row.name,
                row.stats.ms_per_frame(),
                row.stats.frames_per_second(),
                gpu
            )?;
        }
        writeln!(f, "{:-<76}", "")?;
        for (name, reason) in &self.skipped {
            writeln!(f, "{:<30} skipped: {reason}", name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(device_samples: u64) -> RunStatistics {
        RunStatistics {
            frames: 200,
            wall_seconds: 1.0,
            device_time_total: device_samples * 2_500_000,
            device_samples,
        }
    }

    #[test]
    fn report_line_without_device_time() {
        let report = Report {
            name: "bilinear",
            stats: stats(0),
        };
        assert_eq!(
            report.to_string(),
            "'bilinear':\t 200 frames in 1.000000 seconds => 5.000000 ms/frame (200.00 FPS)"
        );
    }

    #[test]
    fn report_line_with_device_time() {
        let report = Report {
            name: "hdr_lut",
            stats: stats(150),
        };
        assert!(report
            .to_string()
            .ends_with("(200.00 FPS), gpu time: 2.500000 ms"));
    }

    #[test]
    fn summary_lists_rows_and_skips() {
        let mut summary = Summary::default();
        assert!(summary.is_empty());
        summary.push(Report {
            name: "bicubic",
            stats: stats(10),
        });
        summary.skip("hdr_peakdetect", "hdr peak detection requires compute shader support");
        let table = summary.to_string();
        assert!(table.contains("bicubic"));
        assert!(table.contains("5.000"));
        assert!(table.contains("200.00"));
        assert!(table.contains("2.500"));
        assert!(table.contains("hdr_peakdetect                 skipped: hdr peak detection"));
    }
}
