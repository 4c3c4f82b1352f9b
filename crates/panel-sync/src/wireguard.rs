use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

/// WireGuard key pair in the base64 form panels store.
#[derive(Clone)]
pub struct WireguardKeys {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for WireguardKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireguardKeys")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl WireguardKeys {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            private_key: BASE64.encode(secret.to_bytes()),
            public_key: BASE64.encode(public.to_bytes()),
        }
    }
}
