//! Shared capture/demodulation library behind the `adsb-feeder` binary,
//! reused by `adsb-receiver` to build a self-contained capture-and-upload
//! daemon without duplicating the IQ/file reading logic.

pub mod capture;
