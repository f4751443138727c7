use chrono::NaiveDate;

/// Hands out `<prefix><N>.csv` names, N counting up from 1.
#[derive(Debug, Clone)]
pub struct TripNamer {
    prefix: String,
    counter: u32,
}

impl TripNamer {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), counter: 1 }
    }

    /// `YYYY_MM_DD_` for `date`.
    pub fn for_date(date: NaiveDate) -> Self {
        Self::with_prefix(date.format("%Y_%m_%d_").to_string())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The number the next file will carry.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn next_file_name(&mut self) -> String {
        let name = format!("{}{}.csv", self.prefix, self.counter);
        self.counter += 1;
        name
    }
}
