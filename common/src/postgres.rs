use crate::args::PostgresArgs;
use anyhow::{Context, Result, bail};
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod};
use rustls::pki_types::CertificateDer;
use tokio_postgres::NoTls;

/// Upper bound on pooled connections; workers contend via short-lived queries.
const MAX_POOL_SIZE: usize = 16;

pub fn create_pool(pg_args: PostgresArgs) -> Result<Pool> {
    let mut cfg = PgConfig::new();
    cfg.host = Some(pg_args.postgres_host);
    cfg.port = Some(pg_args.postgres_port);
    cfg.dbname = Some(pg_args.postgres_database);
    cfg.user = Some(pg_args.postgres_username);
    cfg.password = pg_args
        .postgres_password
        .or_else(|| std::env::var("POSTGRES_PASSWORD").ok());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(MAX_POOL_SIZE));

    match pg_args.postgres_ca_cert {
        Some(ref ca_cert) => {
            let tls = make_rustls(ca_cert.as_bytes())?;
            cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), tls)
                .context("create Postgres pool (tls)")
        }
        None => cfg
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
            .context("create Postgres pool"),
    }
}

/// TLS connector trusting the platform roots plus the server CA handed in
/// via POSTGRES_CA_CERT, as a PEM bundle or a single raw DER cert.
fn make_rustls(ca_bundle: &[u8]) -> Result<tokio_postgres_rustls::MakeRustlsConnect> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        roots.add(cert).ok();
    }

    let mut added = 0usize;
    if ca_bundle.starts_with(b"-----BEGIN") {
        let mut rd: &[u8] = ca_bundle;
        for item in rustls_pemfile::read_all(&mut rd) {
            if let rustls_pemfile::Item::X509Certificate(der) =
                item.context("malformed PEM in POSTGRES_CA_CERT")?
            {
                roots.add(der).context("reject CA certificate")?;
                added += 1;
            }
        }
    } else {
        roots
            .add(CertificateDer::from(ca_bundle.to_vec()))
            .context("reject CA certificate")?;
        added += 1;
    }
    if added == 0 {
        bail!("POSTGRES_CA_CERT contained no certificates");
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(tokio_postgres_rustls::MakeRustlsConnect::new(config))
}
