use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::net::IpAddr;
use std::os::unix::fs::{DirBuilderExt as _, PermissionsExt as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use rsa::pkcs1::{DecodeRsaPrivateKey as _, EncodeRsaPrivateKey as _, LineEnding};
use rsa::pkcs8::EncodePrivateKey as _;
use rsa::RsaPrivateKey;
use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use time::{Duration, OffsetDateTime};

use crate::Config;

/// 39 months is the industry ceiling for certificate validity; stay a month
/// under it.
const CERT_VALIDITY_DAYS: i64 = 38 * 30;

const CERT_SUBJECT_CN: &str = "trackwall root";

/// Mints and caches one leaf certificate per SNI, signed by the process'
/// root certificate. Leaves share the root's key material and are served
/// with the root private key as their own; no external consumer depends on
/// the leaf key identity.
pub struct LeafFactory {
    certs_dir: PathBuf,
    root_cert_path: PathBuf,
    root_key_path: PathBuf,
    minted: Mutex<HashMap<String, Arc<CertifiedKey>>>,
}

impl LeafFactory {
    pub fn new(config: &Config) -> Self {
        LeafFactory {
            certs_dir: config.certs_dir(),
            root_cert_path: config.root_cert.clone(),
            root_key_path: config.root_key.clone(),
            minted: Mutex::new(HashMap::new()),
        }
    }

    /// A server config whose certificate is chosen per handshake from the
    /// SNI; connections without an SNI fail their handshake.
    pub fn server_config(self: Arc<Self>) -> ServerConfig {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(self);
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        config
    }

    /// Load the cached certificate for `name`, minting it first if needed.
    /// Generation is serialized by the factory lock; a racing duplicate
    /// would only waste work, never poison the cache.
    pub fn certified_key(&self, name: &str) -> anyhow::Result<Arc<CertifiedKey>> {
        if name.is_empty() {
            anyhow::bail!("empty server name");
        }
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            anyhow::bail!("refusing a path-like server name: {name:?}");
        }

        let mut minted = self.minted.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = minted.get(name) {
            return Ok(key.clone());
        }

        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.certs_dir)
            .with_context(|| format!("cannot create the certificate cache at {}", self.certs_dir.display()))?;

        let cert_path = self.certs_dir.join(format!("{name}.crt"));
        if !cert_path.exists() {
            self.mint_leaf(name, &cert_path)
                .with_context(|| format!("cannot make a certificate for {name:?}"))?;
        }

        let chain = load_cert_chain(&cert_path)?;
        let key = load_rustls_key(&self.root_key_path)?;
        let signing_key = any_supported_type(&key).context("the root key is unusable for TLS")?;

        let key = Arc::new(CertifiedKey::new(chain, signing_key));
        minted.insert(name.to_owned(), key.clone());
        Ok(key)
    }

    fn mint_leaf(&self, name: &str, cert_path: &Path) -> anyhow::Result<()> {
        tracing::debug!("making a certificate for {name}");

        let root_key = load_signing_keypair(&self.root_key_path)?;
        let root_pem = fs::read_to_string(&self.root_cert_path)
            .with_context(|| format!("cannot read the root certificate at {}", self.root_cert_path.display()))?;
        let issuer_params =
            CertificateParams::from_ca_cert_pem(&root_pem).context("cannot parse the root certificate")?;
        let issuer = issuer_params
            .self_signed(&root_key)
            .context("cannot reconstruct the root certificate")?;

        let mut params = base_params("trackwall");
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.subject_alt_names = vec![match name.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => {
                let dns_name = Ia5String::try_from(name)
                    .map_err(|e| anyhow::anyhow!("server name {name:?} is not a valid DNS name: {e}"))?;
                SanType::DnsName(dns_name)
            }
        }];

        let cert = params
            .signed_by(&root_key, &issuer, &root_key)
            .context("cannot sign the leaf certificate")?;
        fs::write(cert_path, cert.pem()).with_context(|| format!("cannot write {}", cert_path.display()))?;
        Ok(())
    }
}

impl ResolvesServerCert for LeafFactory {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let name = client_hello.server_name()?;
        match self.certified_key(name) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!("cannot provide a certificate for {name:?}: {e:#}");
                None
            }
        }
    }
}

impl fmt::Debug for LeafFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafFactory")
            .field("certs_dir", &self.certs_dir)
            .finish_non_exhaustive()
    }
}

/// Create the root key and root certificate if they are missing, and make
/// sure neither is world-readable. Runs before any listener serves TLS.
pub fn ensure_root_material(config: &Config) -> anyhow::Result<()> {
    if !config.root_key.exists() {
        generate_root_key(&config.root_key)?;
    }
    if !config.root_cert.exists() {
        generate_root_cert(&config.root_cert, &config.root_key)?;
    }
    ensure_tight_permissions(&config.root_key)?;
    ensure_tight_permissions(&config.root_cert)?;
    Ok(())
}

fn generate_root_key(path: &Path) -> anyhow::Result<()> {
    tracing::warn!("generating a new root key at {}", path.display());

    let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).context("RSA key generation failed")?;
    let pem = key.to_pkcs1_pem(LineEnding::LF).context("cannot encode the root key")?;
    fs::write(path, pem.as_bytes()).with_context(|| format!("cannot write {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("cannot chmod {}", path.display()))?;
    Ok(())
}

fn generate_root_cert(cert_path: &Path, key_path: &Path) -> anyhow::Result<()> {
    tracing::warn!("generating a new root certificate at {}", cert_path.display());

    let key = load_signing_keypair(key_path)?;
    let mut params = base_params("trackwall root");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let cert = params.self_signed(&key).context("cannot self-sign the root certificate")?;
    fs::write(cert_path, cert.pem()).with_context(|| format!("cannot write {}", cert_path.display()))?;
    fs::set_permissions(cert_path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("cannot chmod {}", cert_path.display()))?;
    Ok(())
}

fn base_params(organization: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, CERT_SUBJECT_CN);
    dn.push(DnType::OrganizationName, organization);
    params.distinguished_name = dn;

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::hours(24);
    params.not_after = now + Duration::days(CERT_VALIDITY_DAYS);
    params.serial_number = Some(SerialNumber::from_slice(&rand::random::<[u8; 16]>()));
    params
}

/// The root key on disk is PKCS#1 RSA PEM; rcgen wants PKCS#8 DER.
fn load_signing_keypair(path: &Path) -> anyhow::Result<KeyPair> {
    let pem = fs::read_to_string(path).with_context(|| format!("cannot read the root key at {}", path.display()))?;
    let key = RsaPrivateKey::from_pkcs1_pem(&pem).context("the root key is not a PKCS#1 RSA PEM")?;
    let der = key.to_pkcs8_der().context("cannot re-encode the root key")?;
    KeyPair::try_from(der.as_bytes()).map_err(|e| anyhow::anyhow!("the root key is unusable for signing: {e}"))
}

fn load_rustls_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("cannot open the root key at {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let key = rustls_pemfile::rsa_private_keys(&mut reader)
        .next()
        .with_context(|| format!("no RSA private key found in {}", path.display()))?
        .with_context(|| format!("cannot parse the private key in {}", path.display()))?;
    Ok(PrivateKeyDer::Pkcs1(key))
}

fn load_cert_chain(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("cannot open the certificate at {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let chain: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .with_context(|| format!("cannot parse the certificate at {}", path.display()))?;
    if chain.is_empty() {
        anyhow::bail!("no certificate found in {}", path.display());
    }
    Ok(chain)
}

fn ensure_tight_permissions(path: &Path) -> anyhow::Result<()> {
    let metadata = fs::metadata(path).with_context(|| format!("cannot stat {}", path.display()))?;
    if metadata.permissions().mode() & 0o777 != 0o600 {
        tracing::warn!("insecure permissions for {}, fixing", path.display());
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("cannot chmod {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use x509_parser::prelude::{FromDer as _, GeneralName, X509Certificate};

    fn test_config(dir: &Path) -> Config {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.root_key = dir.join("rootCA.key");
        config.root_cert = dir.join("rootCA.pem");
        config.cache_dir = dir.join("cache");
        config
    }

    fn parse_pem_cert(path: &Path) -> Vec<u8> {
        let pem = std::fs::read(path).unwrap();
        let (_, parsed) = x509_parser::pem::parse_x509_pem(&pem).unwrap();
        parsed.contents
    }

    #[test]
    fn bootstrap_creates_root_material_with_tight_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        ensure_root_material(&config).unwrap();

        for path in [&config.root_key, &config.root_cert] {
            let mode = fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{} is not 0600", path.display());
        }

        let der = parse_pem_cert(&config.root_cert);
        let (_, root) = X509Certificate::from_der(&der).unwrap();
        assert!(root.is_ca());
        let cn = root.subject().iter_common_name().next().unwrap();
        assert_eq!(cn.as_str().unwrap(), "trackwall root");
    }

    #[test]
    fn bootstrap_fixes_loose_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        ensure_root_material(&config).unwrap();

        fs::set_permissions(&config.root_key, fs::Permissions::from_mode(0o644)).unwrap();
        ensure_root_material(&config).unwrap();
        let mode = fs::metadata(&config.root_key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn mints_a_leaf_signed_by_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        ensure_root_material(&config).unwrap();

        let factory = LeafFactory::new(&config);
        let key = factory.certified_key("ads.example").unwrap();
        assert_eq!(key.cert.len(), 1);

        let root_der = parse_pem_cert(&config.root_cert);
        let (_, root) = X509Certificate::from_der(&root_der).unwrap();

        let leaf_der = parse_pem_cert(&config.certs_dir().join("ads.example.crt"));
        let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();

        assert!(!leaf.is_ca());
        assert_eq!(leaf.issuer(), root.subject());
        leaf.verify_signature(Some(root.public_key())).unwrap();
        assert!(leaf.validity().is_valid());

        let san = leaf.subject_alternative_name().unwrap().unwrap();
        assert!(san
            .value
            .general_names
            .iter()
            .any(|name| matches!(name, GeneralName::DNSName("ads.example"))));
    }

    #[test]
    fn minted_leaves_are_reloaded_not_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        ensure_root_material(&config).unwrap();

        let factory = LeafFactory::new(&config);
        factory.certified_key("ads.example").unwrap();
        let first = std::fs::read(config.certs_dir().join("ads.example.crt")).unwrap();

        // A second factory (fresh in-memory cache) must reuse the file.
        let factory = LeafFactory::new(&config);
        factory.certified_key("ads.example").unwrap();
        let second = std::fs::read(config.certs_dir().join("ads.example.crt")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ip_literals_get_an_ip_san() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        ensure_root_material(&config).unwrap();

        let factory = LeafFactory::new(&config);
        factory.certified_key("127.0.0.1").unwrap();

        let leaf_der = parse_pem_cert(&config.certs_dir().join("127.0.0.1.crt"));
        let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();
        let san = leaf.subject_alternative_name().unwrap().unwrap();
        assert!(san
            .value
            .general_names
            .iter()
            .any(|name| matches!(name, GeneralName::IPAddress([127, 0, 0, 1]))));
    }

    #[test]
    fn rejects_empty_and_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        ensure_root_material(&config).unwrap();

        let factory = LeafFactory::new(&config);
        assert!(factory.certified_key("").is_err());
        assert!(factory.certified_key("../../etc/passwd").is_err());
        assert!(factory.certified_key("a/b").is_err());
    }
}
