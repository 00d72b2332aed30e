//! Configuration key vocabulary and built-in defaults.
//!
//! The store itself is schema-less; these constants are the closed set of keys
//! the pipeline reads and writes, so typos become compile errors.

// User configuration
pub const HOMELAB_USER: &str = "HOMELAB_USER";
pub const HOMELAB_UID: &str = "HOMELAB_UID";
pub const HOMELAB_GID: &str = "HOMELAB_GID";
pub const HOMELAB_TIMEZONE: &str = "HOMELAB_TIMEZONE";

// Directory configuration
pub const HOMELAB_BASE_DIR: &str = "HOMELAB_BASE_DIR";
pub const APPDATA_PATH: &str = "APPDATA_PATH";
pub const SYSTEMD_UNIT_DIR: &str = "SYSTEMD_UNIT_DIR";

// NFS configuration
pub const NFS_SERVER: &str = "NFS_SERVER";
pub const NFS_EXPORT: &str = "NFS_EXPORT";
pub const NFS_MOUNT_POINT: &str = "NFS_MOUNT_POINT";
pub const NFS_FSTAB_PATH: &str = "NFS_FSTAB_PATH";

// WireGuard configuration
pub const WG_INTERFACE: &str = "WG_INTERFACE";
pub const WG_INTERFACE_IP: &str = "WG_INTERFACE_IP";
pub const WG_LISTEN_PORT: &str = "WG_LISTEN_PORT";
pub const WG_CONFIG_PATH: &str = "WG_CONFIG_PATH";
pub const WG_PUBLIC_KEY: &str = "WG_PUBLIC_KEY";

// Container configuration
pub const CONTAINER_RUNTIME: &str = "CONTAINER_RUNTIME";
pub const SELECTED_SERVICES: &str = "SELECTED_SERVICES";
pub const COMPOSE_PROJECT_NAME: &str = "COMPOSE_PROJECT_NAME";
pub const COMPOSE_TEMPLATE_DIR: &str = "COMPOSE_TEMPLATE_DIR";

// Network checks
pub const NETWORK_TEST_RETRIES: &str = "NETWORK_TEST_RETRIES";
pub const NETWORK_TEST_TIMEOUT: &str = "NETWORK_TEST_TIMEOUT";

// Media stack
pub const PLEX_CLAIM_TOKEN: &str = "PLEX_CLAIM_TOKEN";
pub const JELLYFIN_PUBLIC_URL: &str = "JELLYFIN_PUBLIC_URL";
pub const OVERSEERR_API_KEY: &str = "OVERSEERR_API_KEY";

// Cloud stack
pub const NEXTCLOUD_ADMIN_USER: &str = "NEXTCLOUD_ADMIN_USER";
pub const NEXTCLOUD_ADMIN_PASSWORD: &str = "NEXTCLOUD_ADMIN_PASSWORD";
pub const NEXTCLOUD_DB_PASSWORD: &str = "NEXTCLOUD_DB_PASSWORD";
pub const NEXTCLOUD_TRUSTED_DOMAINS: &str = "NEXTCLOUD_TRUSTED_DOMAINS";
pub const COLLABORA_PASSWORD: &str = "COLLABORA_PASSWORD";
pub const COLLABORA_DOMAIN: &str = "COLLABORA_DOMAIN";
pub const IMMICH_DB_PASSWORD: &str = "IMMICH_DB_PASSWORD";
pub const POSTGRES_USER: &str = "POSTGRES_USER";
pub const REDIS_PASSWORD: &str = "REDIS_PASSWORD";

// Schema version gate for one-time migrations
pub const CONFIG_VERSION: &str = "CONFIG_VERSION";

// Superseded key names, only read by migrations
pub const LEGACY_CONTAINERS_BASE: &str = "CONTAINERS_BASE";
pub const LEGACY_SETUP_USER: &str = "SETUP_USER";

/// Built-in defaults consulted by `ConfigStore::get_or_default` after the
/// stored value and before the caller's fallback.
pub const DEFAULTS: &[(&str, &str)] = &[
    (HOMELAB_BASE_DIR, "/srv/containers"),
    (APPDATA_PATH, "/var/lib/containers/appdata"),
    (SYSTEMD_UNIT_DIR, "/etc/systemd/system"),
    (CONTAINER_RUNTIME, "podman"),
    (NFS_MOUNT_POINT, "/mnt/nas"),
    (NFS_FSTAB_PATH, "/etc/fstab"),
    (NETWORK_TEST_RETRIES, "5"),
    (NETWORK_TEST_TIMEOUT, "10"),
    (WG_INTERFACE, "wg0"),
    (WG_LISTEN_PORT, "51820"),
    (WG_CONFIG_PATH, "/etc/wireguard"),
];

/// Look up the built-in default for `key`.
pub fn default_for(key: &str) -> Option<&'static str> {
    DEFAULTS
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, value)| *value)
}

/// Human-facing metadata for a key: what it is and which CLI flag seeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo {
    pub key: &'static str,
    pub description: &'static str,
    pub flag: Option<&'static str>,
    pub secret: bool,
}

const KEY_INFO: &[KeyInfo] = &[
    KeyInfo { key: HOMELAB_USER, description: "homelab user name", flag: Some("--setup-user"), secret: false },
    KeyInfo { key: HOMELAB_BASE_DIR, description: "homelab base directory", flag: Some("--homelab-base-dir"), secret: false },
    KeyInfo { key: NFS_SERVER, description: "NFS server address", flag: Some("--nfs-server"), secret: false },
    KeyInfo { key: NFS_EXPORT, description: "NFS export path", flag: Some("--nfs-export"), secret: false },
    KeyInfo { key: WG_INTERFACE_IP, description: "WireGuard interface address (CIDR)", flag: Some("--wg-interface-ip"), secret: false },
    KeyInfo { key: SELECTED_SERVICES, description: "container stacks to deploy", flag: Some("--selected-services"), secret: false },
    KeyInfo { key: PLEX_CLAIM_TOKEN, description: "Plex claim token", flag: Some("--plex-token"), secret: true },
    KeyInfo { key: JELLYFIN_PUBLIC_URL, description: "Jellyfin public URL", flag: Some("--jellyfin-url"), secret: false },
    KeyInfo { key: OVERSEERR_API_KEY, description: "Overseerr API key", flag: Some("--overseerr-api-key"), secret: true },
    KeyInfo { key: NEXTCLOUD_ADMIN_USER, description: "Nextcloud admin username", flag: Some("--nextcloud-admin-user"), secret: false },
    KeyInfo { key: NEXTCLOUD_ADMIN_PASSWORD, description: "Nextcloud admin password", flag: Some("--nextcloud-admin-password"), secret: true },
    KeyInfo { key: NEXTCLOUD_DB_PASSWORD, description: "Nextcloud database password", flag: Some("--nextcloud-db-password"), secret: true },
    KeyInfo { key: NEXTCLOUD_TRUSTED_DOMAINS, description: "Nextcloud trusted domain", flag: Some("--nextcloud-domain"), secret: false },
    KeyInfo { key: COLLABORA_PASSWORD, description: "Collabora admin password", flag: Some("--collabora-password"), secret: true },
    KeyInfo { key: IMMICH_DB_PASSWORD, description: "Immich database password", flag: Some("--immich-db-password"), secret: true },
    KeyInfo { key: POSTGRES_USER, description: "PostgreSQL username for Immich", flag: Some("--postgres-user"), secret: false },
    KeyInfo { key: REDIS_PASSWORD, description: "Redis password", flag: Some("--redis-password"), secret: true },
];

/// Metadata for `key`, if it is one the CLI knows how to seed.
pub fn info(key: &str) -> Option<&'static KeyInfo> {
    KEY_INFO.iter().find(|info| info.key == key)
}

/// Whether values for `key` should be masked in listings and prompts.
pub fn is_secret(key: &str) -> bool {
    info(key).is_some_and(|info| info.secret) || key.ends_with("_PASSWORD")
}
