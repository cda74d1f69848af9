pub mod client_hello;
pub mod fingerprint;
pub mod fingerprinter;
pub mod keylog;
pub mod mimic;
pub mod presets;

pub use fingerprint::FingerprintSpec;
pub use fingerprinter::{Fingerprinter, FingerprinterHandle, FingerprintResult, HelloRecord};
pub use keylog::KeyLogWriter;
pub use mimic::{MimicConnector, UpstreamServerName};
