pub mod aircon;
pub mod blind;
pub mod listener;

pub mod protos {
    pub mod generated {
        include!(concat!(env!("OUT_DIR"), "/generated/mod.rs"));
    }
}
