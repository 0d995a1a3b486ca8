/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Wire exchanges with the controller.

use std::{net::Ipv6Addr, time::Duration};

use async_trait::async_trait;
use url::Url;

use crate::{
    net::{HttpResponse, HttpsClient},
    settings::PROTOCOL_VERSION,
    Result,
};

/// Identity and key material sent with every negotiation.
#[derive(Clone, Debug)]
pub struct NegotiationRequest {
    pub mac: String,
    pub hostname: String,
    pub recovery_key: String,
    pub config_key: String,
    pub wg_public: String,
}

impl NegotiationRequest {
    /// Form fields, in protocol order.
    pub fn form(&self) -> Vec<(&str, &str)> {
        vec![
            ("scriptversion", PROTOCOL_VERSION),
            ("mac", &self.mac),
            ("hostname", &self.hostname),
            ("recovery-key", &self.recovery_key),
            ("config-key", &self.config_key),
            ("wg_public", &self.wg_public),
        ]
    }
}

/// Classified controller answer, independent of raw HTTP codes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NegotiationStatus {
    /// A bootstrap document was handed out
    Downloaded(String),
    /// The controller knows nothing for this node yet
    NotProvisioned,
    /// Any other answer
    Unexpected(u16),
}

impl From<HttpResponse> for NegotiationStatus {
    fn from(rep: HttpResponse) -> Self {
        match rep.status {
            200 => Self::Downloaded(rep.text()),
            204 => Self::NotProvisioned,
            code => Self::Unexpected(code),
        }
    }
}

#[async_trait]
pub trait ControllerApi {
    /// POST the node identity to `https://<controller>/bootstrap/`.
    async fn negotiate(&self, controller: &str, request: &NegotiationRequest)
        -> Result<NegotiationStatus>;

    /// GET `https://<host>/recovery/`. `None` unless the answer is a 200.
    async fn fetch_recovery(&self, host: &str) -> Result<Option<String>>;
}

/// Build `https://<host>/<path>/`, bracketing bare IPv6 literals.
pub fn endpoint(host: &str, path: &str) -> Result<Url> {
    let host = match host.parse::<Ipv6Addr>() {
        Ok(_) => format!("[{}]", host),
        Err(_) => host.to_string(),
    };

    Ok(Url::parse(&format!("https://{}/{}/", host, path))?)
}

/// [`ControllerApi`] over HTTPS.
pub struct HttpsController {
    client: HttpsClient,
    recovery_client: HttpsClient,
}

impl HttpsController {
    pub fn new(client: HttpsClient, recovery_timeout: Duration) -> Self {
        let recovery_client = client.with_timeout(recovery_timeout);
        Self { client, recovery_client }
    }
}

#[async_trait]
impl ControllerApi for HttpsController {
    async fn negotiate(
        &self,
        controller: &str,
        request: &NegotiationRequest,
    ) -> Result<NegotiationStatus> {
        let url = endpoint(controller, "bootstrap")?;
        let rep = self.client.post_form(&url, &request.form()).await?;
        Ok(rep.into())
    }

    async fn fetch_recovery(&self, host: &str) -> Result<Option<String>> {
        let url = endpoint(host, "recovery")?;
        let rep = self.recovery_client.get(&url).await?;
        if rep.status != 200 {
            return Ok(None)
        }
        Ok(Some(rep.text()))
    }
}
