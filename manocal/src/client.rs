//! Typed command exchange with one device
//!
//! One request/response round trip per call: write the encoded packet to
//! the command endpoint, read the answer back, decode it against the
//! command we sent. Link loss mid-exchange surfaces as the
//! [`Error::DeviceDisconnected`] sentinel so callers can stop retrying.

use std::time::Duration;

use tracing::trace;

use manocal_core::{CalRequest, CalResponse};
use manocal_transport::{DeviceLink, Endpoint, EndpointSet, LinkHandle};
use manocal_types::DeviceId;

use crate::error::{Error, Result};

pub struct DeviceClient<'a> {
    link: &'a dyn DeviceLink,
    device: DeviceId,
    handle: LinkHandle,
    endpoints: EndpointSet,
    timeout: Duration,
}

impl<'a> DeviceClient<'a> {
    pub fn new(
        link: &'a dyn DeviceLink,
        device: DeviceId,
        handle: LinkHandle,
        endpoints: EndpointSet,
        timeout: Duration,
    ) -> Self {
        Self {
            link,
            device,
            handle,
            endpoints,
            timeout,
        }
    }

    /// Issue one command and decode its response
    pub async fn execute(&self, request: CalRequest) -> Result<CalResponse> {
        let command = request.command();
        let frame = request.encode()?;

        trace!(device = %self.device, %command, "issuing command");

        self.link
            .write(self.handle, self.endpoints.command, &frame, self.timeout)
            .await
            .map_err(|e| self.link_error(e))?;

        let raw = self
            .link
            .read(self.handle, self.endpoints.command, self.timeout)
            .await
            .map_err(|e| self.link_error(e))?;

        Ok(CalResponse::decode(command, &raw)?)
    }

    /// Read an endpoint as a NUL-padded UTF-8 string
    pub async fn read_string(&self, endpoint: Endpoint) -> Result<String> {
        let raw = self
            .link
            .read(self.handle, endpoint, self.timeout)
            .await
            .map_err(|e| self.link_error(e))?;

        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    fn link_error(&self, e: manocal_transport::Error) -> Error {
        if e.is_disconnect() {
            Error::DeviceDisconnected {
                device: self.device.clone(),
            }
        } else {
            Error::Link(e)
        }
    }
}
