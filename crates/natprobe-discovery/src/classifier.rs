//! NAT Type Classification
//!
//! Runs the RFC 3489 Section 10.1 test sequence against a single STUN server.
//!
//! - Test I: plain Binding Request
//! - Test II: Binding Request with "change IP" and "change port" set
//! - Test I(II): plain Binding Request to the CHANGED-ADDRESS from test I
//! - Test III: Binding Request with only "change port" set, to the
//!   CHANGED-ADDRESS from test I
//!
//! ```text
//!  Test I ──no──► UDP Blocked
//!    │ yes
//!    ├── mapped == local ──► Test II ──yes──► Open Internet
//!    │                          └──no───► Symmetric UDP Firewall
//!    │
//!    └── mapped != local ──► Test II ──yes──► Full Cone
//!                               │ no
//!                               ▼
//!                          Test I(II) ──no──► fatal
//!                               │ yes
//!                  mapped differs ──► Symmetric
//!                               │ same
//!                               ▼
//!                           Test III ──yes──► Restricted Cone
//!                               └──no───► Port Restricted Cone
//! ```
//!
//! Each box is a [`Step`]; [`ClassificationRun::advance`] performs exactly one
//! transaction and returns the next step.

use crate::error::ClassifyError;
use crate::observer::{TracingObserver, TransactionObserver};
use crate::socket::DatagramSocket;
use crate::transaction::{Transact, TransactionConfig, TransactionExecutor, TransactionOutcome};
use crate::types::{ClassificationResult, NatType};
use natprobe_stun::{ChangeRequest, StunMessage};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Host name resolution
pub trait Resolve {
    /// Resolve `host` to socket addresses on `port`
    ///
    /// # Errors
    ///
    /// Returns the resolver's error
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system ([`ToSocketAddrs`])
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok((host, port).to_socket_addrs()?.collect())
    }
}

/// Position in the decision tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Test I against the primary server address
    BindingTest,
    /// Test II with no translation observed
    OpenFilteringTest {
        /// Mapped address from test I
        mapped: SocketAddr,
    },
    /// Test II behind a NAT
    NatFilteringTest {
        /// Mapped address from test I
        mapped: SocketAddr,
        /// CHANGED-ADDRESS from test I
        changed: Option<SocketAddr>,
    },
    /// Test I(II) against the changed address
    MappingTest {
        /// Mapped address from test I
        mapped: SocketAddr,
        /// CHANGED-ADDRESS from test I
        changed: Option<SocketAddr>,
    },
    /// Test III against the changed address
    RestrictionTest {
        /// Mapped address from test I
        mapped: SocketAddr,
        /// CHANGED-ADDRESS from test I, known to answer
        changed: SocketAddr,
    },
    /// Terminal classification
    Done(ClassificationResult),
}

/// One pass through the decision tree against a resolved server
pub struct ClassificationRun<'t, T: ?Sized> {
    transport: &'t mut T,
    server: SocketAddr,
}

impl<'t, T: Transact + ?Sized> ClassificationRun<'t, T> {
    /// Prepare a run against `server`
    pub fn new(transport: &'t mut T, server: SocketAddr) -> Self {
        Self { transport, server }
    }

    /// Drive the tree to a terminal step
    ///
    /// # Errors
    ///
    /// Returns `ClassifyError` if test I(II) gets no response, the server
    /// answers test I with an error or without a mapped address, or the
    /// local address cannot be read.
    pub fn run(mut self) -> Result<ClassificationResult, ClassifyError> {
        let mut step = Step::BindingTest;
        loop {
            step = match self.advance(step)? {
                Step::Done(result) => {
                    tracing::info!(
                        server = %self.server,
                        nat_type = %result.nat_type(),
                        public_endpoint = ?result.public_endpoint(),
                        "NAT classification complete"
                    );
                    return Ok(result);
                }
                next => next,
            };
        }
    }

    /// Perform the transaction for `step` and return the next one
    ///
    /// # Errors
    ///
    /// See [`ClassificationRun::run`].
    pub fn advance(&mut self, step: Step) -> Result<Step, ClassifyError> {
        match step {
            Step::BindingTest => self.binding_test(),
            Step::OpenFilteringTest { mapped } => Ok(self.open_filtering_test(mapped)),
            Step::NatFilteringTest { mapped, changed } => {
                Ok(self.nat_filtering_test(mapped, changed))
            }
            Step::MappingTest { mapped, changed } => self.mapping_test(mapped, changed),
            Step::RestrictionTest { mapped, changed } => {
                Ok(self.restriction_test(mapped, changed))
            }
            Step::Done(result) => Ok(Step::Done(result)),
        }
    }

    fn binding_test(&mut self) -> Result<Step, ClassifyError> {
        tracing::debug!(server = %self.server, "test I: binding request");
        let request = StunMessage::binding_request();
        let Some(response) = self.response(&request, Some(self.server))? else {
            return Ok(Step::Done(ClassificationResult::blocked()));
        };

        let mapped = response
            .mapped_address()
            .ok_or(ClassifyError::MissingMappedAddress("test I"))?;
        let changed = response.changed_address();
        let local = self.transport.local_addr()?;
        tracing::debug!(%local, %mapped, ?changed, "test I answered");

        if local == mapped {
            Ok(Step::OpenFilteringTest { mapped })
        } else {
            Ok(Step::NatFilteringTest { mapped, changed })
        }
    }

    fn open_filtering_test(&mut self, mapped: SocketAddr) -> Step {
        tracing::debug!(server = %self.server, "test II: change IP and port, no NAT");
        let nat_type = if self.answered(ChangeRequest::BOTH, Some(self.server)) {
            NatType::OpenInternet
        } else {
            NatType::SymmetricUdpFirewall
        };
        Step::Done(ClassificationResult::new(nat_type, mapped))
    }

    fn nat_filtering_test(&mut self, mapped: SocketAddr, changed: Option<SocketAddr>) -> Step {
        tracing::debug!(server = %self.server, "test II: change IP and port, behind NAT");
        if self.answered(ChangeRequest::BOTH, Some(self.server)) {
            Step::Done(ClassificationResult::new(NatType::FullCone, mapped))
        } else {
            Step::MappingTest { mapped, changed }
        }
    }

    fn mapping_test(
        &mut self,
        mapped: SocketAddr,
        changed: Option<SocketAddr>,
    ) -> Result<Step, ClassifyError> {
        tracing::debug!(?changed, "test I(II): binding request to changed address");
        if changed.is_none() {
            tracing::warn!(server = %self.server, "server reported no CHANGED-ADDRESS");
        }

        let request = StunMessage::binding_request();
        let (Some(changed), TransactionOutcome::Response(response)) =
            (changed, self.transport.transact(&request, changed))
        else {
            return Err(ClassifyError::FatalProtocol(
                "test I(II) got no response from the changed address",
            ));
        };

        // Only a reported mapping that differs proves a symmetric NAT
        match response.mapped_address() {
            Some(remapped) if remapped != mapped => {
                tracing::debug!(%mapped, %remapped, "mapping differs per destination");
                Ok(Step::Done(ClassificationResult::new(NatType::Symmetric, mapped)))
            }
            Some(_) => Ok(Step::RestrictionTest { mapped, changed }),
            None => {
                tracing::warn!(
                    kind = %response.kind,
                    "test I(II) response carried no mapped address, treating mapping as unchanged"
                );
                Ok(Step::RestrictionTest { mapped, changed })
            }
        }
    }

    fn restriction_test(&mut self, mapped: SocketAddr, changed: SocketAddr) -> Step {
        tracing::debug!(%changed, "test III: change port");
        let nat_type = if self.answered(ChangeRequest::PORT_ONLY, Some(changed)) {
            NatType::RestrictedCone
        } else {
            NatType::PortRestrictedCone
        };
        Step::Done(ClassificationResult::new(nat_type, mapped))
    }

    /// Run a transaction whose response carries data the tree needs
    ///
    /// Error responses are fatal here: without a mapped address the tree
    /// cannot continue.
    fn response(
        &mut self,
        request: &StunMessage,
        destination: Option<SocketAddr>,
    ) -> Result<Option<StunMessage>, ClassifyError> {
        match self.transport.transact(request, destination) {
            TransactionOutcome::Response(response) if response.kind.is_error() => {
                let (code, reason) = response
                    .error_code()
                    .map_or((0, String::new()), |e| (e.code(), e.reason().to_string()));
                Err(ClassifyError::ErrorResponse { code, reason })
            }
            TransactionOutcome::Response(response) => Ok(Some(response)),
            TransactionOutcome::NoResponse => Ok(None),
        }
    }

    /// Run a filtering transaction where only arrival matters
    ///
    /// An error response means the server refused the change request and
    /// answered from its primary address, so it does not count as passing
    /// the filter.
    fn answered(&mut self, change: ChangeRequest, destination: Option<SocketAddr>) -> bool {
        let request = StunMessage::binding_request().with_change_request(change);
        match self.transport.transact(&request, destination) {
            TransactionOutcome::Response(response) if response.kind.is_error() => {
                tracing::warn!(
                    error = ?response.error_code(),
                    "server rejected change request, treating as no response"
                );
                false
            }
            TransactionOutcome::Response(_) => true,
            TransactionOutcome::NoResponse => false,
        }
    }
}

/// NAT classifier
///
/// Validates arguments, resolves the server, and runs the decision tree over
/// a borrowed socket.
///
/// # Example
///
/// ```rust,no_run
/// use natprobe_discovery::{NatClassifier, TransactionConfig};
/// use natprobe_discovery::socket::bind_udp_socket;
/// use std::time::Duration;
///
/// let socket = bind_udp_socket("0.0.0.0:0".parse().unwrap()).unwrap();
/// let classifier = NatClassifier::new()
///     .with_config(TransactionConfig::default().with_budget(Duration::from_secs(1)));
///
/// let result = classifier.classify("stun.example.org", 3478, &socket).unwrap();
/// println!("{} via {}", result, result.traversal_strategy());
/// ```
#[derive(Debug, Clone, Default)]
pub struct NatClassifier<R = SystemResolver> {
    config: TransactionConfig,
    resolver: R,
}

impl NatClassifier {
    /// Create a classifier with default timing and the system resolver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: Resolve> NatClassifier<R> {
    /// Set transaction timing
    #[must_use]
    pub fn with_config(mut self, config: TransactionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the resolver
    #[must_use]
    pub fn with_resolver<R2: Resolve>(self, resolver: R2) -> NatClassifier<R2> {
        NatClassifier {
            config: self.config,
            resolver,
        }
    }

    /// Active transaction timing
    #[must_use]
    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Classify the NAT between `socket` and the STUN server `host:port`
    ///
    /// Transient failures are logged through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns `ClassifyError::InvalidArgument` for an empty host, port 0, or
    /// a non-datagram socket; `ClassifyError::HostResolution` if the host does
    /// not resolve; and the errors of [`ClassificationRun::run`].
    pub fn classify<S>(
        &self,
        host: &str,
        port: u16,
        socket: &S,
    ) -> Result<ClassificationResult, ClassifyError>
    where
        S: DatagramSocket + ?Sized,
    {
        self.classify_with_observer(host, port, socket, TracingObserver)
    }

    /// [`NatClassifier::classify`] with a custom transaction observer
    ///
    /// # Errors
    ///
    /// See [`NatClassifier::classify`].
    pub fn classify_with_observer<S, O>(
        &self,
        host: &str,
        port: u16,
        socket: &S,
        observer: O,
    ) -> Result<ClassificationResult, ClassifyError>
    where
        S: DatagramSocket + ?Sized,
        O: TransactionObserver,
    {
        if host.is_empty() {
            return Err(ClassifyError::InvalidArgument("host must not be empty"));
        }
        if port < 1 {
            return Err(ClassifyError::InvalidArgument("port must be >= 1"));
        }
        if !socket.is_udp()? {
            return Err(ClassifyError::InvalidArgument("socket must be a UDP socket"));
        }

        let local = socket.local_addr()?;
        let server = self.resolve(host, port, local)?;
        tracing::debug!(%host, %server, %local, "classifying NAT");

        let mut executor = TransactionExecutor::new(socket, self.config).with_observer(observer);
        ClassificationRun::new(&mut executor, server).run()
    }

    /// Resolve the server, preferring the socket's address family
    fn resolve(
        &self,
        host: &str,
        port: u16,
        local: SocketAddr,
    ) -> Result<SocketAddr, ClassifyError> {
        let addrs = self
            .resolver
            .resolve(host, port)
            .map_err(|source| ClassifyError::HostResolution {
                host: host.to_string(),
                source,
            })?;

        if let Some(addr) = addrs.iter().find(|addr| addr.is_ipv4() == local.is_ipv4()) {
            return Ok(*addr);
        }

        let Some(&fallback) = addrs.first() else {
            return Err(ClassifyError::HostResolution {
                host: host.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
            });
        };
        tracing::warn!(
            %host,
            %fallback,
            %local,
            "no address in the socket's family, sends are likely to fail"
        );
        Ok(fallback)
    }
}

/// Classify with default timing and the system resolver
///
/// # Errors
///
/// See [`NatClassifier::classify`].
pub fn classify<S>(host: &str, port: u16, socket: &S) -> Result<ClassificationResult, ClassifyError>
where
    S: DatagramSocket + ?Sized,
{
    NatClassifier::new().classify(host, port, socket)
}
