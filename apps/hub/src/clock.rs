use chrono::{DateTime, Local};
use std::time::Duration;

/// Wall time and sleeping for the control loop. Actuator sequences sleep through
/// this so that tests can run a 25 second close in no time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
pub mod fake {
    use super::Clock;
    use chrono::{DateTime, Local, TimeZone};
    use std::sync::Mutex;
    use std::time::Duration;

    pub struct FakeClock {
        now: Mutex<DateTime<Local>>,
    }

    impl FakeClock {
        pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32) -> Self {
            let now = Local.with_ymd_and_hms(year, month, day, hour, min, 0).unwrap();
            FakeClock { now: Mutex::new(now) }
        }

        pub fn advance(&self, by: chrono::Duration) {
            let mut now = self.now.lock().unwrap();
            *now = *now + by;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Local> {
            *self.now.lock().unwrap()
        }

        fn sleep(&self, duration: Duration) {
            self.advance(chrono::Duration::from_std(duration).unwrap());
        }
    }
}
