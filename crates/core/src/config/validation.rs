use super::helpers::tcp_host_port;
use super::types::DpipConfig;
use crate::error::DpipError;

impl DpipConfig {
    /// Validate the config: endpoint syntax, gateway URL and timeouts.
    pub fn validate(&self) -> Result<(), DpipError> {
        self.validate_channels()?;
        self.validate_gateway()?;
        self.validate_timeouts()?;
        Ok(())
    }

    fn validate_channels(&self) -> Result<(), DpipError> {
        let channels = [
            ("workloads", &self.channels.workloads),
            ("images", &self.channels.images),
            ("registry", &self.channels.registry),
            ("dispatcher", &self.channels.dispatcher),
        ];
        for (name, endpoint) in channels {
            let valid = if let Some(path) = endpoint.strip_prefix("ipc://") {
                path.strip_prefix("/tmp/dpip/")
                    .and_then(|file| file.strip_suffix(".sock"))
                    .is_some_and(|name| !name.is_empty() && !name.contains('/'))
            } else {
                tcp_host_port(endpoint).is_some()
            };
            if !valid {
                return Err(DpipError::Config(format!(
                    "channel '{name}' has invalid endpoint '{endpoint}', expected tcp://host:port or ipc:///tmp/dpip/<name>.sock"
                )));
            }
        }
        Ok(())
    }

    fn validate_gateway(&self) -> Result<(), DpipError> {
        let url = &self.gateway.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DpipError::Config(format!(
                "gateway base_url '{url}' must start with http:// or https://"
            )));
        }
        Ok(())
    }

    fn validate_timeouts(&self) -> Result<(), DpipError> {
        if self.dispatch.rpc_timeout_ms == 0 {
            return Err(DpipError::Config("dispatch.rpc_timeout_ms must be > 0".into()));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(DpipError::Config("dispatch.queue_capacity must be > 0".into()));
        }
        if self.gateway.timeout_secs == 0 {
            return Err(DpipError::Config("gateway.timeout_secs must be > 0".into()));
        }
        if self.worker.join_timeout_secs == 0 {
            return Err(DpipError::Config("worker.join_timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}
