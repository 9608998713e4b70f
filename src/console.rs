//! Full-screen terminal view of the latest sample.
//!
//! The screen is cleared and redrawn for every batch using plain ANSI escape
//! sequences. Figures the operator watches are highlighted; a non-zero error
//! counter is shown in red.

use crate::consumer::SampleDisplay;
use crate::data::sample::Sample;
use std::fmt::Write as _;
use std::io::{self, Write};

const CLEAR_SCREEN: &str = "\x1B[H\x1B[2J";
const RESET: &str = "\x1B[0m";

/// Bold white on blue.
pub fn important(text: &str) -> String {
    format!("\x1B[1;39;44m{}{}", text, RESET)
}

/// Bold white on red.
pub fn erroneous(text: &str) -> String {
    format!("\x1B[1;39;41m{}{}", text, RESET)
}

/// Green on default background.
pub fn green(text: &str) -> String {
    format!("\x1B[0;32;49m{}{}", text, RESET)
}

/// Bold white.
pub fn bold(text: &str) -> String {
    format!("\x1B[1;39;49m{}{}", text, RESET)
}

/// High-precision figure.
pub fn hs(value: f64) -> String {
    format!("{:+11.6}", value)
}

/// Low-precision figure.
pub fn ls(value: f64) -> String {
    format!("{:+8.3}", value)
}

fn counter(count: u64) -> String {
    if count > 0 {
        erroneous(&count.to_string())
    } else {
        count.to_string()
    }
}

/// Render the whole screen for `sample`.
pub fn render(sample: &Sample, queue_depth: usize, nplc: f64, burden_resistance: f64) -> String {
    let mut out = String::from(CLEAR_SCREEN);
    // Writing into a String cannot fail.
    let _ = write_screen(&mut out, sample, queue_depth, nplc, burden_resistance);
    out
}

fn write_screen(
    out: &mut String,
    s: &Sample,
    queue_depth: usize,
    nplc: f64,
    burden_resistance: f64,
) -> std::fmt::Result {
    writeln!(
        out,
        "now = {} s   elapsed = {} s   since last autozero = {} s",
        bold(&format!("{:.3}", s.initiate_timestamp)),
        bold(&format!("{:+6.1}", s.initiate_timestamp - s.start_timestamp)),
        bold(&format!("{:+6.1}", s.initiate_timestamp - s.auto_zero_timestamp)),
    )?;
    writeln!(
        out,
        " dt = {} s            max dt = {} s         timing errors = {}",
        bold(&format!("{:+.3}", s.dt)),
        bold(&format!("{:+.3}", s.max_dt)),
        counter(s.timing_errors),
    )?;
    writeln!(
        out,
        " queue = {}                              reading faults = {}",
        queue_depth,
        counter(s.reading_faults),
    )?;
    writeln!(out)?;
    writeln!(out, "    PLC/sample                        = {}", nplc)?;
    writeln!(
        out,
        "    Voltmeter-motherboard resistance  = {} Ω",
        burden_resistance
    )?;
    writeln!(out)?;
    writeln!(
        out,
        "    Voltmeter temperature             = {}°C",
        green(&format!("{:.3}", s.voltmeter_temperature))
    )?;
    writeln!(
        out,
        "    Ammeter temperature               = {}°C",
        green(&format!("{:.3}", s.ammeter_temperature))
    )?;
    writeln!(out, "    Samples                           = {}", s.number)?;
    writeln!(out)?;

    writeln!(out, "    Raw measurements:")?;
    writeln!(out, "        U           = {} V", hs(s.voltage))?;
    writeln!(out, "        I           = {} A", important(&hs(s.current)))?;
    writeln!(out, "        P           = {} W", hs(s.power))?;
    writeln!(
        out,
        "       ∫P dt        = {} Ws = {} Wh",
        hs(s.energy),
        hs(s.energy / 3600.0)
    )?;
    writeln!(out)?;

    writeln!(out, "    Corrected measurements:")?;
    writeln!(
        out,
        "        U           = {} V (error = {} V)",
        important(&hs(s.voltage_corrected)),
        hs(s.voltage_error)
    )?;
    writeln!(
        out,
        "        P           = {} W (error = {} W)",
        important(&hs(s.power_corrected)),
        hs(s.power - s.power_corrected)
    )?;
    writeln!(
        out,
        "       ∫P dt        = {} Ws = {} Wh",
        hs(s.energy_corrected),
        important(&hs(s.energy_corrected / 3600.0))
    )?;
    writeln!(out)?;

    writeln!(
        out,
        "    Filtered measurements ({} taps, Hann):",
        s.filter_taps
    )?;
    writeln!(
        out,
        "        U           = {} V",
        important(&ls(s.voltage_corrected_filtered))
    )?;
    writeln!(
        out,
        "        I           = {} A",
        important(&ls(s.current_filtered))
    )?;
    writeln!(
        out,
        "        P           = {} W",
        important(&ls(s.power_corrected_filtered))
    )?;
    Ok(())
}

/// [`SampleDisplay`] drawing on a terminal.
pub struct Console<W: Write + Send> {
    out: W,
    nplc: f64,
    burden_resistance: f64,
}

impl<W: Write + Send> Console<W> {
    /// Console writing to `out`; the settings are shown verbatim.
    pub fn new(out: W, nplc: f64, burden_resistance: f64) -> Self {
        Self {
            out,
            nplc,
            burden_resistance,
        }
    }

    /// Consume the console, returning the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl Console<io::Stdout> {
    /// Console on standard output.
    pub fn stdout(nplc: f64, burden_resistance: f64) -> Self {
        Self::new(io::stdout(), nplc, burden_resistance)
    }
}

impl<W: Write + Send> SampleDisplay for Console<W> {
    fn show(&mut self, sample: &Sample, queue_depth: usize) -> io::Result<()> {
        let screen = render(sample, queue_depth, self.nplc, self.burden_resistance);
        self.out.write_all(screen.as_bytes())?;
        self.out.flush()
    }
}
