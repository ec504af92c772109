//! Bluetooth/location permission negotiation.
//!
//! The negotiator sits between the platform permission API and callers
//! that want to scan. Besides the per-capability grants it tracks whether
//! the platform will still show a prompt, which most platforms only reveal
//! in the answer to a request.

pub mod store;

use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;

use crate::{error::Result, permissions::store::DenialStore};

/// A permission the scanner may need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
   Scan,
   Connect,
   Location,
}

/// Answer to a single permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RequestOutcome {
   Granted,
   /// Denied, but the platform will prompt again next time.
   Denied,
   /// Denied, and the platform will not prompt again.
   DeniedPermanently,
}

/// Which capabilities a platform asks the user for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PlatformProfile {
   /// The Bluetooth stack authorizes the process itself (`BlueZ`, iOS).
   #[default]
   Implicit,
   /// A single location permission covers scanning (Android before API 31).
   Legacy,
   /// Separate scan, connect and location permissions (Android API 31+).
   Split,
}

impl PlatformProfile {
   pub const fn required(self) -> &'static [Capability] {
      match self {
         Self::Implicit => &[],
         Self::Legacy => &[Capability::Location],
         Self::Split => &[Capability::Scan, Capability::Connect, Capability::Location],
      }
   }

   /// Picks the Android profile for an API level.
   pub const fn for_android_api(level: u32) -> Self {
      if level >= 31 { Self::Split } else { Self::Legacy }
   }
}

/// Snapshot of the grants relevant to scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PermissionState {
   pub scan: bool,
   pub connect: bool,
   pub location: bool,
   pub all_granted: bool,
   /// Whether the platform will still show a prompt.
   pub can_ask_again: bool,
}

impl PermissionState {
   const fn denied() -> Self {
      Self {
         scan: false,
         connect: false,
         location: false,
         all_granted: false,
         can_ask_again: false,
      }
   }

   fn from_grants(grants: &Grants, can_ask_again: bool) -> Self {
      Self {
         scan: grants.scan,
         connect: grants.connect,
         location: grants.location,
         all_granted: grants.all(),
         can_ask_again: grants.all() || can_ask_again,
      }
   }

   pub fn to_json(self) -> serde_json::Value {
      serde_json::to_value(self).unwrap_or_default()
   }
}

/// Platform permission API.
pub trait PermissionBackend: Send + Sync {
   fn profile(&self) -> PlatformProfile;

   /// Reads a grant without prompting.
   fn check(&self, capability: Capability) -> bool;

   /// Prompts for the given capabilities and reports each answer.
   fn request(&self, capabilities: &[Capability]) -> Result<Vec<(Capability, RequestOutcome)>>;
}

/// Backend for stacks that need no runtime permission.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImplicitBackend;

impl PermissionBackend for ImplicitBackend {
   fn profile(&self) -> PlatformProfile {
      PlatformProfile::Implicit
   }

   fn check(&self, _capability: Capability) -> bool {
      true
   }

   fn request(&self, capabilities: &[Capability]) -> Result<Vec<(Capability, RequestOutcome)>> {
      Ok(capabilities.iter().map(|&c| (c, RequestOutcome::Granted)).collect())
   }
}

/// What callers gate scanning on.
pub trait PermissionGate: Send + Sync {
   /// Current grants, without prompting.
   fn check(&self) -> PermissionState;

   /// Prompts for anything missing.
   fn request(&self) -> PermissionState;
}

/// Capabilities not required by the profile count as granted.
#[derive(Debug, Clone, Copy)]
struct Grants {
   scan: bool,
   connect: bool,
   location: bool,
}

impl Grants {
   const fn all_granted() -> Self {
      Self {
         scan: true,
         connect: true,
         location: true,
      }
   }

   const fn get(&self, capability: Capability) -> bool {
      match capability {
         Capability::Scan => self.scan,
         Capability::Connect => self.connect,
         Capability::Location => self.location,
      }
   }

   const fn set(&mut self, capability: Capability, granted: bool) {
      match capability {
         Capability::Scan => self.scan = granted,
         Capability::Connect => self.connect = granted,
         Capability::Location => self.location = granted,
      }
   }

   const fn all(&self) -> bool {
      self.scan && self.connect && self.location
   }
}

/// Checks and requests permissions, remembering permanent denials.
pub struct PermissionNegotiator<B, S> {
   backend: B,
   store: S,
}

impl<B: PermissionBackend, S: DenialStore> PermissionNegotiator<B, S> {
   pub const fn new(backend: B, store: S) -> Self {
      Self { backend, store }
   }

   pub fn into_gate(self) -> Arc<dyn PermissionGate>
   where
      B: 'static,
      S: 'static,
   {
      Arc::new(self)
   }

   fn current_grants(&self) -> Grants {
      let mut grants = Grants::all_granted();
      for &capability in self.backend.profile().required() {
         grants.set(capability, self.backend.check(capability));
      }
      grants
   }

   fn denied_permanently(&self) -> bool {
      self.store.denied_permanently().unwrap_or_else(|e| {
         warn!("Failed to read permission flag: {e}");
         false
      })
   }

   fn set_denied_permanently(&self, denied: bool) {
      if let Err(e) = self.store.set_denied_permanently(denied) {
         warn!("Failed to persist permission flag: {e}");
      }
   }

   /// Reads the grants without prompting.
   ///
   /// When everything is granted a remembered permanent denial is cleared,
   /// since the user must have granted access from system settings.
   pub fn check(&self) -> PermissionState {
      let grants = self.current_grants();
      if grants.all() {
         if self.denied_permanently() {
            info!("Permissions granted from settings, clearing permanent denial");
            self.set_denied_permanently(false);
         }
         return PermissionState::from_grants(&grants, true);
      }

      PermissionState::from_grants(&grants, !self.denied_permanently())
   }

   /// Prompts for every capability not yet granted.
   pub fn request(&self) -> PermissionState {
      let mut grants = self.current_grants();
      let missing: Vec<Capability> = self
         .backend
         .profile()
         .required()
         .iter()
         .copied()
         .filter(|&c| !grants.get(c))
         .collect();

      if missing.is_empty() {
         return self.check();
      }

      let outcomes = match self.backend.request(&missing) {
         Ok(outcomes) => outcomes,
         Err(e) => {
            warn!("Permission request failed: {e}");
            return PermissionState::denied();
         },
      };

      let mut any_permanent = false;
      for capability in missing {
         let outcome = outcomes
            .iter()
            .find(|(c, _)| *c == capability)
            .map_or(RequestOutcome::Denied, |(_, o)| *o);
         debug!("Permission {capability}: {outcome}");

         grants.set(capability, outcome == RequestOutcome::Granted);
         any_permanent |= outcome == RequestOutcome::DeniedPermanently;
      }

      if any_permanent {
         info!("Permission denied permanently, prompts will no longer be shown");
         self.set_denied_permanently(true);
      } else if grants.all() {
         self.set_denied_permanently(false);
      }

      PermissionState::from_grants(&grants, !any_permanent && !self.denied_permanently())
   }
}

impl<B: PermissionBackend, S: DenialStore> PermissionGate for PermissionNegotiator<B, S> {
   fn check(&self) -> PermissionState {
      Self::check(self)
   }

   fn request(&self) -> PermissionState {
      Self::request(self)
   }
}
