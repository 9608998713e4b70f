//! One acquisition cycle worth of measurements.

/// Header line of every daily CSV file.
pub const CSV_HEADER: [&str; 14] = [
    "#timestamp",
    "#voltage",
    "#voltmeter_temperature",
    "#current",
    "#ammeter_temperature",
    "#power",
    "#energy",
    "#voltage_corrected",
    "#power_corrected",
    "#energy_corrected",
    "#voltage_corrected_filtered",
    "#current_filtered",
    "#power_corrected_filtered",
    "#energy_corrected_filtered",
];

/// Single sample from both meters, with everything derived from it.
///
/// Built once by the acquisition loop and never mutated afterwards. Timestamps are
/// UNIX seconds; energies are in watt-seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    /// Sequence number, starting at 1.
    pub number: u64,
    /// Cycles so far whose `dt` exceeded twice the nominal period.
    pub timing_errors: u64,
    /// Readings substituted by zero so far.
    pub reading_faults: u64,
    /// Start of the test.
    pub start_timestamp: f64,
    /// Moment the INITIATE ending this cycle was sent.
    pub initiate_timestamp: f64,
    /// Last auto-zero.
    pub auto_zero_timestamp: f64,
    /// Time since the previous cycle's INITIATE.
    pub dt: f64,
    /// Largest `dt` seen so far.
    pub max_dt: f64,
    /// Length of the smoothing filters.
    pub filter_taps: usize,

    // Voltmeter:
    /// Raw voltage reading.
    pub voltage: f64,
    /// Voltmeter internal temperature at the last auto-zero.
    pub voltmeter_temperature: f64,

    // Ammeter:
    /// Raw current reading.
    pub current: f64,
    /// Ammeter internal temperature at the last auto-zero.
    pub ammeter_temperature: f64,

    // Measurements:
    /// `voltage * current`.
    pub power: f64,
    /// Running integral of `power`.
    pub energy: f64,
    /// Voltage dropped on the burden resistance.
    pub voltage_error: f64,
    /// `voltage - voltage_error`.
    pub voltage_corrected: f64,
    /// `voltage_corrected * current`.
    pub power_corrected: f64,
    /// Running integral of `power_corrected`.
    pub energy_corrected: f64,
    /// Smoothed `voltage_corrected`.
    pub voltage_corrected_filtered: f64,
    /// Smoothed `current`.
    pub current_filtered: f64,
    /// `voltage_corrected_filtered * current_filtered`.
    pub power_corrected_filtered: f64,
    /// Running integral of `power_corrected_filtered`.
    pub energy_corrected_filtered: f64,
}

impl Sample {
    /// Fields of the CSV row, in header order, with fixed precision.
    pub fn to_record(&self) -> [String; 14] {
        [
            format!("{:.6}", self.initiate_timestamp),
            format!("{:.9}", self.voltage),
            format!("{:.3}", self.voltmeter_temperature),
            format!("{:.9}", self.current),
            format!("{:.3}", self.ammeter_temperature),
            format!("{:.18}", self.power),
            format!("{:.18}", self.energy),
            format!("{:.18}", self.voltage_corrected),
            format!("{:.18}", self.power_corrected),
            format!("{:.18}", self.energy_corrected),
            format!("{:.9}", self.voltage_corrected_filtered),
            format!("{:.6}", self.current_filtered),
            format!("{:.18}", self.power_corrected_filtered),
            format!("{:.18}", self.energy_corrected_filtered),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_fixed_precision() {
        let sample = Sample {
            initiate_timestamp: 1_462_060_800.25,
            voltage: 12.5,
            voltmeter_temperature: 31.25,
            current: -0.5,
            ammeter_temperature: 30.0,
            power: -6.25,
            current_filtered: 0.1,
            ..Default::default()
        };
        let record = sample.to_record();

        assert_eq!(record[0], "1462060800.250000");
        assert_eq!(record[1], "12.500000000");
        assert_eq!(record[2], "31.250");
        assert_eq!(record[3], "-0.500000000");
        assert_eq!(record[5], "-6.250000000000000000");
        assert_eq!(record[11], "0.100000");
        assert_eq!(record.len(), CSV_HEADER.len());
    }

    #[test]
    fn header_matches_log_format() {
        assert_eq!(
            CSV_HEADER.join(","),
            "#timestamp,#voltage,#voltmeter_temperature,#current,#ammeter_temperature,#power,\
             #energy,#voltage_corrected,#power_corrected,#energy_corrected,\
             #voltage_corrected_filtered,#current_filtered,#power_corrected_filtered,\
             #energy_corrected_filtered"
        );
    }
}
