use std::collections::HashMap;

use anyhow::{Context, Error};
use log::warn;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_yaml::Value;

/// Free-form, namespaced configuration store, keyed by dotted paths such as
/// `core.proxy.store` or `<gadget>.device-service.url`.
#[derive(Debug, Clone, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NamespacedConfig(HashMap<String, Value>);

type Parameter<T> = Option<Result<T, Error>>;

impl NamespacedConfig {
    pub fn get<T>(&self, key: impl AsRef<str>) -> Parameter<T>
    where
        T: DeserializeOwned,
    {
        self.0.get(key.as_ref()).map(|v| {
            warn!("using configuration override '{}':\n{:#?}", key.as_ref(), v);
            serde_yaml::from_value(v.clone())
                .with_context(|| format!("Failed to parse as '{}'", std::any::type_name::<T>()))
        })
    }

    pub fn get_string(&self, key: impl AsRef<str>) -> Parameter<String> {
        self.get(key)
    }

    pub fn get_vec_string(&self, key: impl AsRef<str>) -> Parameter<Vec<String>> {
        self.get(key)
    }

    pub fn get_flag(&self, key: impl AsRef<str>) -> bool {
        self.get(key).transpose().ok().flatten().unwrap_or(false)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }
}

/// Whether `core.store.access` or `<gadget>.device-service.access` is set to the
/// offline sentinel, short-circuiting registration and network-backed remodels.
pub fn is_offline_access(value: Option<&str>) -> bool {
    value == Some("offline")
}

/// Accessors for the configuration keys named by the external interfaces: proxy-store
/// name, store/device-service access mode, per-gadget device-service settings,
/// registration body overrides, and kernel command-line appends.
pub struct DeviceConfig<'a> {
    params: &'a NamespacedConfig,
    gadget_name: &'a str,
}

impl<'a> DeviceConfig<'a> {
    pub fn new(params: &'a NamespacedConfig, gadget_name: &'a str) -> Self {
        Self { params, gadget_name }
    }

    pub fn proxy_store(&self) -> Option<String> {
        self.params.get_string("core.proxy.store").transpose().ok().flatten()
    }

    pub fn store_offline(&self) -> bool {
        is_offline_access(
            self.params
                .get_string("core.store.access")
                .transpose()
                .ok()
                .flatten()
                .as_deref(),
        )
    }

    pub fn device_service_url(&self) -> Option<String> {
        self.params
            .get_string(format!("{}.device-service.url", self.gadget_name))
            .transpose()
            .ok()
            .flatten()
    }

    pub fn device_service_offline(&self) -> bool {
        is_offline_access(
            self.params
                .get_string(format!("{}.device-service.access", self.gadget_name))
                .transpose()
                .ok()
                .flatten()
                .as_deref(),
        )
    }

    pub fn registration_body(&self) -> Option<String> {
        self.params
            .get_string(format!("{}.registration.body", self.gadget_name))
            .transpose()
            .ok()
            .flatten()
    }

    pub fn proposed_serial(&self) -> Option<String> {
        self.params
            .get_string(format!("{}.registration.proposed-serial", self.gadget_name))
            .transpose()
            .ok()
            .flatten()
    }

    pub fn kernel_cmdline_append(&self) -> Vec<String> {
        self.params
            .get_vec_string("core.system.kernel.cmdline-append")
            .transpose()
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Honoured only when the model's grade is `dangerous`.
    pub fn dangerous_cmdline_append(&self) -> Vec<String> {
        self.params
            .get_vec_string("core.system.kernel.dangerous-cmdline-append")
            .transpose()
            .ok()
            .flatten()
            .unwrap_or_default()
    }
}
