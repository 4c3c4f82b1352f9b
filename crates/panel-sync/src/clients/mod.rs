pub mod pasarguard;
pub mod threexui;

pub use pasarguard::PasarGuardClient;
pub use threexui::ThreeXuiClient;
