/// Maps lux onto levels 0 (night) to 4 (strong direct sun).
#[derive(Debug, Clone, Copy)]
pub struct SunlightLevelClassifier {
    thresholds: [u32; 4],
}

impl SunlightLevelClassifier {
    pub fn new(thresholds: [u32; 4]) -> Self {
        SunlightLevelClassifier { thresholds }
    }

    pub fn classify(&self, lux: u32) -> u8 {
        self.thresholds.iter().filter(|t| lux >= **t).count() as u8
    }
}

/// Tracks whether the outdoor temperature is outside the comfortable band.
/// Leaving the band is immediate; coming back needs `gap` degrees of margin.
#[derive(Debug, Clone, Copy)]
pub struct TemperatureThresholdTracker {
    high: f64,
    low: f64,
    gap: f64,
    outside: bool,
}

impl TemperatureThresholdTracker {
    pub fn new(high: f64, low: f64, gap: f64, outside: bool) -> Self {
        TemperatureThresholdTracker { high, low, gap, outside }
    }

    pub fn outside(&self) -> bool {
        self.outside
    }

    /// Returns true when the state flipped.
    pub fn update(&mut self, temp: f64) -> bool {
        let next = if self.outside {
            !(temp > self.low + self.gap && temp < self.high - self.gap)
        } else {
            temp > self.high || temp < self.low
        };
        let flipped = next != self.outside;
        self.outside = next;
        flipped
    }
}
