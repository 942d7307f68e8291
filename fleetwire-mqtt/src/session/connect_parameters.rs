// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Translates a [`MqttConnectionSettings`] into the `rumqttc` options needed to open a
//! connection.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::connection_settings::MqttConnectionSettings;

/// Error building connect parameters from [`MqttConnectionSettings`].
#[derive(Debug, Error)]
pub enum ConnectParametersError {
    /// The CA file could not be read.
    #[error("failed to read CA file {path}: {source}")]
    CaFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The CA file contents were not valid PEM.
    #[error("failed to parse CA file as PEM")]
    InvalidCa,
}

/// Build the `rumqttc::v5::MqttOptions` used to open a connection for this session.
pub fn mqtt_options(
    settings: &MqttConnectionSettings,
) -> Result<rumqttc::v5::MqttOptions, ConnectParametersError> {
    let mut options =
        rumqttc::v5::MqttOptions::new(settings.client_id.clone(), settings.host_name.clone(), settings.tcp_port);
    options.set_keep_alive(Duration::from_secs(u64::from(settings.keep_alive_secs)));
    options.set_clean_start(settings.clean_start);

    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        options.set_credentials(username.clone(), password.clone());
    }

    if settings.use_tls {
        let tls_config = tls_configuration(settings)?;
        options.set_transport(rumqttc::Transport::tls_with_config(tls_config));
    }

    Ok(options)
}

fn tls_configuration(
    settings: &MqttConnectionSettings,
) -> Result<rumqttc::TlsConfiguration, ConnectParametersError> {
    let mut roots = rumqttc::tokio_rustls::rustls::RootCertStore::empty();

    if let Some(ca_file) = &settings.ca_file {
        let pem = std::fs::read(ca_file).map_err(|source| ConnectParametersError::CaFile {
            path: ca_file.clone(),
            source,
        })?;
        let certs = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ConnectParametersError::InvalidCa)?;
        for cert in certs {
            roots
                .add(cert)
                .map_err(|_| ConnectParametersError::InvalidCa)?;
        }
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let tls_client_config = rumqttc::tokio_rustls::rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(rumqttc::TlsConfiguration::Rustls(Arc::new(tls_client_config)))
}
