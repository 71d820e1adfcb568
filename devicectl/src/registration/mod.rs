pub mod backoff;

use std::time::Duration;

use devicectl_api::{
    assertion::{AssertionEnvelope, AssertionStore},
    config::DeviceConfig,
    device::DeviceStateRecord,
    error::{DeviceError, FatalNetError, InternalError, ReportError, TransientNetError},
    model::ModelAssertion,
    serial::SerialAssertion,
};
use log::{debug, info, warn};
use openssl::{hash::MessageDigest, pkey::PKey, rsa::Rsa, sign::Signer};
use url::Url;

use self::backoff::{Action, BackoffPolicy, Outcome};

/// States of the registration state machine, in the order a device progresses through
/// them on the way to a persisted serial assertion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegistrationState {
    NoKey,
    Keyed,
    RequestPrepared,
    RequestSubmitted,
    Polling,
    HaveSerial,
    Finalised,
}

/// Generated device credential: the 4096-bit key pair plus a locally-assigned key id
/// recorded on the device record.
pub struct DeviceKey {
    pub key_id: String,
    keypair: PKey<openssl::pkey::Private>,
}

impl DeviceKey {
    pub fn generate() -> Result<Self, DeviceError> {
        let rsa = Rsa::generate(4096).structured(InternalError::Internal("rsa keygen failed"))?;
        let keypair =
            PKey::from_rsa(rsa).structured(InternalError::Internal("rsa keypair wrap failed"))?;
        let public_der = keypair
            .public_key_to_der()
            .structured(InternalError::Internal("public key encode failed"))?;
        let key_id = sha256_hex(&public_der);
        Ok(Self { key_id, keypair })
    }

    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.keypair)
            .structured(InternalError::Internal("signer init failed"))?;
        signer
            .update(payload)
            .structured(InternalError::Internal("signer update failed"))?;
        signer
            .sign_to_vec()
            .structured(InternalError::Internal("signer finalize failed"))
    }
}

fn sha256_hex(data: &[u8]) -> String {
    use sha2::Digest;
    let digest = sha2::Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Drives a device from no key at all to a persisted, finalised serial assertion,
/// following the registration machine's state transitions and retry policy.
pub struct RegistrationMachine {
    state: RegistrationState,
    backoff: BackoffPolicy,
    key: Option<DeviceKey>,
    request_id: Option<String>,
    pending_request_body: Option<Vec<u8>>,
    client: reqwest::blocking::Client,
}

impl RegistrationMachine {
    pub fn new() -> Self {
        Self {
            state: RegistrationState::NoKey,
            backoff: BackoffPolicy::default(),
            key: None,
            request_id: None,
            pending_request_body: None,
            client: reqwest::blocking::Client::new(),
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Signs `payload` with the device key generated for this registration attempt, for
    /// callers that need to produce the signature `finalize` expects.
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, DeviceError> {
        self.key
            .as_ref()
            .structured(InternalError::Internal("sign called without a key"))?
            .sign(payload)
    }

    /// `NoKey -> Keyed`: generates the device signing key pair.
    pub fn generate_key(&mut self, record: &mut DeviceStateRecord) -> Result<(), DeviceError> {
        let key = DeviceKey::generate()?;
        record.key_id = Some(key.key_id.clone());
        self.key = Some(key);
        self.state = RegistrationState::Keyed;
        info!("Registration: generated device key {}", record.key_id.as_deref().unwrap_or(""));
        Ok(())
    }

    /// Chooses the device-service endpoint: a gadget-configured URL directly, optionally
    /// routed through a proxy store that advertises `Snap-Store-Version >= 6`.
    /// `store.access`/`device-service.access = "offline"` short-circuits registration.
    pub fn select_endpoint(
        &self,
        config: &DeviceConfig,
        default_url: &Url,
        probe_proxy_version: impl FnOnce(&str) -> Option<u32>,
    ) -> Result<Option<Url>, DeviceError> {
        if config.store_offline() || config.device_service_offline() {
            debug!("Registration: store or device-service access is offline, skipping");
            return Ok(None);
        }

        let target = config
            .device_service_url()
            .map(|u| Url::parse(&u))
            .transpose()
            .structured(InternalError::Internal("invalid device-service.url"))?
            .unwrap_or_else(|| default_url.clone());

        if let Some(proxy) = config.proxy_store() {
            match probe_proxy_version(&proxy) {
                Some(version) if version >= 6 => {
                    debug!("Registration: routing through proxy store '{proxy}'");
                    return Ok(Some(target));
                }
                _ => {
                    warn!(
                        "Registration: proxy store '{proxy}' does not advertise Snap-Store-Version >= 6, ignoring proxy"
                    );
                }
            }
        }

        Ok(Some(target))
    }

    /// `Keyed -> RequestPrepared`: fetches a request id and signs the serial-request body.
    pub fn prepare_request(
        &mut self,
        base_url: &Url,
        model: &ModelAssertion,
        proposed_serial: Option<&str>,
        registration_body: Option<&str>,
    ) -> Result<(), DeviceError> {
        let key = self
            .key
            .as_ref()
            .structured(InternalError::Internal("prepare_request called without a key"))?;

        let request_id_url = base_url
            .join("request-id")
            .structured(InternalError::Internal("invalid device-service base url"))?;

        let response = self
            .client
            .get(request_id_url)
            .send()
            .map_err(classify_transport_error)?;

        let outcome = classify_status(response.status().as_u16());
        match outcome {
            Outcome::Ok => {}
            other => return Err(self.record_outcome(other)),
        }

        #[derive(serde::Deserialize)]
        struct RequestIdResponse {
            #[serde(rename = "request-id")]
            request_id: String,
        }
        let parsed: RequestIdResponse = response
            .json()
            .structured(FatalNetError::MalformedResponse)?;

        let mut payload = serde_json::json!({
            "brand-id": model.brand_id,
            "model": model.model_name,
            "request-id": parsed.request_id,
            "device-key-id": key.key_id,
        });
        if let Some(serial) = proposed_serial {
            payload["proposed-serial"] = serde_json::Value::String(serial.to_string());
        }
        if let Some(body) = registration_body {
            payload["device-service-body"] = serde_json::Value::String(body.to_string());
        }

        let encoded = serde_json::to_vec(&payload)
            .structured(InternalError::Internal("failed to encode serial-request"))?;
        let _signature = key.sign(&encoded)?;

        self.request_id = Some(parsed.request_id);
        self.pending_request_body = Some(encoded);
        self.state = RegistrationState::RequestPrepared;
        Ok(())
    }

    /// `RequestPrepared -> RequestSubmitted -> {HaveSerial | Polling}`: posts the stream
    /// and classifies the response.
    pub fn submit_request(
        &mut self,
        base_url: &Url,
        model: &ModelAssertion,
    ) -> Result<Option<SerialAssertion>, DeviceError> {
        let body = self
            .pending_request_body
            .clone()
            .structured(InternalError::Internal("submit_request called without a prepared request"))?;

        self.state = RegistrationState::RequestSubmitted;

        let devices_url = base_url
            .join("devices")
            .structured(InternalError::Internal("invalid device-service base url"))?;

        let response = self
            .client
            .post(devices_url)
            .header("Content-Type", "application/vnd.snap.assertion")
            .header("Snap-Device-Capabilities", "serial-stream")
            .body(body)
            .send()
            .map_err(classify_transport_error)?;

        let status = response.status().as_u16();
        if status == 202 {
            self.state = RegistrationState::Polling;
            self.backoff.step(Outcome::Ok);
            return Ok(None);
        }

        let outcome = classify_status(status);
        if outcome != Outcome::Ok {
            return Err(self.record_outcome(outcome));
        }

        let serial: SerialAssertion = response
            .json()
            .structured(FatalNetError::MalformedResponse)?;

        self.crosscheck(&serial, model)?;

        self.state = RegistrationState::HaveSerial;
        self.backoff.step(Outcome::Ok);
        Ok(Some(serial))
    }

    /// `Polling -> {HaveSerial | Polling}`: re-submits the stored request.
    pub fn poll(
        &mut self,
        base_url: &Url,
        model: &ModelAssertion,
    ) -> Result<Option<SerialAssertion>, DeviceError> {
        self.state = RegistrationState::RequestPrepared;
        self.submit_request(base_url, model)
    }

    fn crosscheck(&self, serial: &SerialAssertion, model: &ModelAssertion) -> Result<(), DeviceError> {
        let key = self
            .key
            .as_ref()
            .structured(InternalError::Internal("crosscheck called without a key"))?;

        if serial.brand_id != model.brand_id
            || serial.model_name != model.model_name
            || serial.device_key_id != key.key_id
        {
            return Err(DeviceError::new(FatalNetError::IdentityMismatch {
                brand_id: serial.brand_id.clone(),
                model_name: serial.model_name.clone(),
                key_id: serial.device_key_id.clone(),
            }));
        }

        if serial.effective_authority() != serial.brand_id
            && !model.serial_authority.iter().any(|a| a == serial.effective_authority())
        {
            return Err(DeviceError::new(FatalNetError::UnlistedSerialAuthority {
                authority: serial.effective_authority().to_string(),
            }));
        }

        Ok(())
    }

    /// `HaveSerial -> Finalised`: persists the serial assertion into the runtime
    /// assertion database and, if present, a separate save-partition database.
    pub fn finalize(
        &mut self,
        serial: SerialAssertion,
        record: &mut DeviceStateRecord,
        runtime_store: &mut dyn AssertionStore,
        save_partition_store: Option<&mut dyn AssertionStore>,
        signature: Vec<u8>,
    ) -> Result<(), DeviceError> {
        let envelope = AssertionEnvelope::for_serial(&serial, signature);

        runtime_store
            .add(envelope.clone())
            .structured(InternalError::Internal("failed to persist serial assertion"))?;

        if let Some(store) = save_partition_store {
            // Failure to persist to the save-partition database is a short retry, not
            // fatal: it does not block the device from proceeding as registered.
            if let Err(e) = store.add(envelope) {
                warn!("Registration: failed to persist serial to save partition: {e:#}");
            }
        }

        record.serial = Some(serial.serial);
        self.state = RegistrationState::Finalised;
        Ok(())
    }

    fn record_outcome(&mut self, outcome: Outcome) -> DeviceError {
        match self.backoff.step(outcome) {
            Action::Advance => DeviceError::new(InternalError::Internal("unreachable: advance on error path")),
            Action::RetrySoon(_) => DeviceError::new(match outcome {
                Outcome::NoNetwork => TransientNetError::NoNetwork,
                Outcome::ClockSkew => TransientNetError::ClockSkew,
                _ => TransientNetError::ServerTransient { status: 0 },
            }),
            Action::Abort => DeviceError::new(FatalNetError::TentativeBudgetExhausted {
                tentatives: self.backoff.tentatives(),
            }),
        }
    }
}

impl Default for RegistrationMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_status(status: u16) -> Outcome {
    match status {
        200 | 201 | 202 => Outcome::Ok,
        s if (500..600).contains(&s) => Outcome::OtherTransient,
        _ => Outcome::Fatal,
    }
}

fn classify_transport_error(err: reqwest::Error) -> DeviceError {
    if err.is_connect() || err.is_timeout() {
        DeviceError::new(TransientNetError::NoNetwork)
    } else {
        DeviceError::new(FatalNetError::MalformedResponse)
    }
}

/// Convenience wrapper matching the retry helper every HTTP call is expected to go
/// through: classify the error and emit either a fatal error, a retry, or a success.
pub fn retry_after(outcome: Outcome, policy: &mut BackoffPolicy) -> Option<Duration> {
    match policy.step(outcome) {
        Action::RetrySoon(d) => Some(d),
        _ => None,
    }
}
