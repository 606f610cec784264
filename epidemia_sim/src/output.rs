//! Daily output: CSV rows or an aligned console table.

use epidemia_core::{CityRecord, DailyRecord, RunSummary};
use std::io::{self, Write};

/// Receives one record per simulated day.
pub trait RecordSink {
    fn write_record(&mut self, record: &DailyRecord) -> io::Result<()>;

    /// Per-city breakdown of the day just written.
    fn write_cities(&mut self, _records: &[CityRecord]) -> io::Result<()> {
        Ok(())
    }

    fn finish(&mut self, summary: &RunSummary) -> io::Result<()>;
}

/// Forwards everything to several sinks in turn.
#[derive(Default)]
pub struct Fanout<'a> {
    sinks: Vec<&'a mut dyn RecordSink>,
}

impl<'a> Fanout<'a> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: &'a mut dyn RecordSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl RecordSink for Fanout<'_> {
    fn write_record(&mut self, record: &DailyRecord) -> io::Result<()> {
        self.sinks.iter_mut().try_for_each(|s| s.write_record(record))
    }

    fn write_cities(&mut self, records: &[CityRecord]) -> io::Result<()> {
        self.sinks.iter_mut().try_for_each(|s| s.write_cities(records))
    }

    fn finish(&mut self, summary: &RunSummary) -> io::Result<()> {
        self.sinks.iter_mut().try_for_each(|s| s.finish(summary))
    }
}

// =============================================================================
// CSV
// =============================================================================

const CSV_HEADER: &str = "day,scope,population,susceptible,vaccinated,gestating,asymptomatic,infected,\
recovered,dead,immune,total_infected,new_infected,growth,untouched_cities,untouched_clusters,susceptible_clusters";

/// Comma-separated rows under a single header. World rows have scope
/// `world`; city rows carry the city name and leave the world-only
/// columns empty.
pub struct CsvSink<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> CsvSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn header(&mut self) -> io::Result<()> {
        if !self.header_written {
            writeln!(self.out, "{CSV_HEADER}")?;
            self.header_written = true;
        }
        Ok(())
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn write_record(&mut self, r: &DailyRecord) -> io::Result<()> {
        self.header()?;
        let c = &r.counts;
        writeln!(
            self.out,
            "{},world,{},{},{},{},{},{},{},{},{},{},{},{:.4},{},{},{}",
            r.day,
            c.population,
            c.susceptible,
            c.vaccinated,
            c.gestating,
            c.asymptomatic,
            c.infected,
            c.recovered,
            c.dead,
            c.immune,
            c.total_infected,
            r.new_infected,
            r.growth,
            r.untouched_cities,
            r.untouched_clusters,
            r.susceptible_clusters
        )
    }

    fn write_cities(&mut self, records: &[CityRecord]) -> io::Result<()> {
        self.header()?;
        for r in records {
            let c = &r.counts;
            writeln!(
                self.out,
                "{},{},{},{},{},{},{},{},{},{},{},{},,,,{},{}",
                r.day,
                r.name,
                c.population,
                c.susceptible,
                c.vaccinated,
                c.gestating,
                c.asymptomatic,
                c.infected,
                c.recovered,
                c.dead,
                c.immune,
                c.total_infected,
                r.untouched_clusters,
                r.susceptible_clusters
            )?;
        }
        Ok(())
    }

    fn finish(&mut self, _summary: &RunSummary) -> io::Result<()> {
        self.out.flush()
    }
}

// =============================================================================
// TABLE
// =============================================================================

/// Aligned columns for reading in a terminal, with a closing summary.
pub struct TableSink<W: Write> {
    out: W,
    rows: usize,
}

impl<W: Write> TableSink<W> {
    /// Repeat the column titles after this many rows.
    const PAGE: usize = 40;

    pub fn new(out: W) -> Self {
        Self { out, rows: 0 }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn titles(&mut self) -> io::Result<()> {
        writeln!(
            self.out,
            "{:>5} {:>9} {:>7} {:>9} {:>9} {:>6} {:>8} {:>8} {:>7}",
            "Day", "Active", "Growth", "New", "Total", "%Pop", "Immune", "Dead", "Cities"
        )
    }
}

impl<W: Write> RecordSink for TableSink<W> {
    fn write_record(&mut self, r: &DailyRecord) -> io::Result<()> {
        if self.rows % Self::PAGE == 0 {
            self.titles()?;
        }
        self.rows += 1;
        let c = &r.counts;
        let percent = 100.0 * c.total_infected as f64 / c.population.max(1) as f64;
        writeln!(
            self.out,
            "{:>5} {:>9} {:>7.3} {:>9} {:>9} {:>6.2} {:>8} {:>8} {:>7}",
            r.day,
            r.active(),
            r.growth,
            r.new_infected,
            c.total_infected,
            percent,
            c.immune,
            c.dead,
            r.untouched_cities
        )
    }

    fn write_cities(&mut self, records: &[CityRecord]) -> io::Result<()> {
        for r in records {
            let c = &r.counts;
            writeln!(
                self.out,
                "      {:<6} pop {:>8} active {:>7} total {:>8} dead {:>6} untouched clusters {:>6}",
                r.name,
                c.population,
                c.active(),
                c.total_infected,
                c.dead,
                r.untouched_clusters
            )?;
        }
        Ok(())
    }

    fn finish(&mut self, s: &RunSummary) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(
            self.out,
            "Days {} | infected {} of {} ({:.1}%) | dead {}",
            s.days,
            s.total_infected,
            s.population,
            100.0 * s.total_infected as f64 / s.population.max(1) as f64,
            s.dead
        )?;
        write!(
            self.out,
            "Peak {} on day {} | max growth {:.1}%",
            s.max_active,
            s.max_active_day,
            (s.max_growth - 1.0) * 100.0
        )?;
        match s.days_to_double {
            Some(days) => writeln!(self.out, " | days to double {days:.1}")?,
            None => writeln!(self.out)?,
        }
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epidemia_core::CounterSnapshot;

    fn record(day: u32, total: u32) -> DailyRecord {
        DailyRecord {
            day,
            counts: CounterSnapshot {
                population: 100,
                susceptible: 100 - total,
                infected: total,
                total_infected: total,
                ..CounterSnapshot::default()
            },
            new_infected: 1,
            growth: 1.5,
            untouched_cities: 2,
            untouched_clusters: 7,
            susceptible_clusters: 9,
        }
    }

    fn city(day: u32) -> CityRecord {
        CityRecord {
            day,
            city: 0,
            name: "C000".to_string(),
            counts: CounterSnapshot {
                population: 60,
                susceptible: 60,
                ..CounterSnapshot::default()
            },
            untouched_clusters: 3,
            susceptible_clusters: 4,
        }
    }

    #[test]
    fn test_csv_rows_match_header() {
        let mut sink = CsvSink::new(Vec::new());
        sink.write_record(&record(0, 4)).unwrap();
        sink.write_cities(&[city(0)]).unwrap();
        sink.write_record(&record(1, 6)).unwrap();
        sink.finish(&RunSummary::default()).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        let columns = lines[0].split(',').count();
        assert_eq!(columns, 17);
        for line in &lines[1..] {
            assert_eq!(line.split(',').count(), columns, "{line}");
        }
        assert!(lines[1].starts_with("0,world,100,96,"));
        assert!(lines[2].starts_with("0,C000,60,60,"));
        assert!(lines[3].ends_with(",1.5000,2,7,9"));
    }

    #[test]
    fn test_table_summary() {
        let mut sink = TableSink::new(Vec::new());
        sink.write_record(&record(3, 10)).unwrap();
        let summary = RunSummary {
            days: 3,
            population: 100,
            total_infected: 10,
            max_growth: 2.0,
            days_to_double: Some(1.0),
            ..RunSummary::default()
        };
        sink.finish(&summary).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.starts_with("  Day"));
        assert!(text.contains("infected 10 of 100 (10.0%)"));
        assert!(text.contains("days to double 1.0"));
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let mut a = CsvSink::new(Vec::new());
        let mut b = CsvSink::new(Vec::new());
        {
            let mut both = Fanout::new().with(&mut a).with(&mut b);
            both.write_record(&record(0, 1)).unwrap();
        }
        assert_eq!(a.into_inner(), b.into_inner());
    }
}
