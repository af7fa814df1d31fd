//! Connection lifecycle: connect, log in, stream, back off, reconnect.
//!
//! The lifecycle is an explicit state machine. [`Client::step`] consumes one
//! [`State`] and returns the next, and [`Client::run`] does this until
//! [`State::ShutDown`] is reached.
//!
//! The connection only lives inside [`State::Authenticating`] and
//! [`State::Streaming`], so it's closed as soon as the session leaves those
//! states, no matter why.

use tokio::{
    io::{
        AsyncBufReadExt,
        AsyncRead,
        AsyncWrite,
        AsyncWriteExt,
        BufReader,
    },
    net::TcpStream,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    config::Config,
    observer::Observer,
    reader::{
        Dispatcher,
        StreamEnd,
        read_frames,
    },
};

/// Opens connections to the APRS-IS server.
pub trait Connect {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn connect(&mut self) -> impl Future<Output = Result<Self::Stream, std::io::Error>> + Send;
}

/// Connects via TCP.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Connect for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&mut self) -> Result<TcpStream, std::io::Error> {
        TcpStream::connect((self.host.as_str(), self.port)).await
    }
}

#[derive(Debug)]
pub enum State<S> {
    Idle,
    Connecting,
    /// Connected, waiting for the banner.
    Authenticating(BufReader<S>),
    Streaming(BufReader<S>),
    /// The connection has been closed.
    Draining(DrainReason),
    Backoff,
    ShutDown,
}

impl<S> State<S> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticating(_) => "authenticating",
            Self::Streaming(_) => "streaming",
            Self::Draining(_) => "draining",
            Self::Backoff => "backoff",
            Self::ShutDown => "shut-down",
        }
    }
}

/// Why a connection was closed.
#[derive(Debug)]
pub enum DrainReason {
    IdleTimeout,
    /// Closed by the server.
    Closed,
    Shutdown,
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct Client<C, O> {
    connector: C,
    config: Config,
    dispatcher: Dispatcher<O>,
    shutdown: CancellationToken,
    attempt: usize,
}

impl<C, O> Client<C, O> {
    pub fn new(connector: C, config: Config, observer: O) -> Self {
        let dispatcher = Dispatcher::new(config.filter_policy(), observer);
        Self {
            connector,
            config,
            dispatcher,
            shutdown: CancellationToken::new(),
            attempt: 0,
        }
    }

    /// Provide a [`CancellationToken`] with which the client can be shut down.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

impl<C: Connect, O: Observer> Client<C, O> {
    /// Runs sessions until shutdown is requested.
    pub async fn run(mut self) {
        let mut state = State::Idle;

        while !matches!(state, State::ShutDown) {
            let span = tracing::info_span!("session", attempt = self.attempt);
            state = self.step(state).instrument(span).await;
            tracing::debug!(state = state.name(), "transition");
        }

        tracing::info!("shut down");
    }

    pub async fn step(&mut self, state: State<C::Stream>) -> State<C::Stream> {
        match state {
            State::Idle => State::Connecting,
            State::Connecting => self.connect().await,
            State::Authenticating(connection) => self.authenticate(connection).await,
            State::Streaming(connection) => self.stream(connection).await,
            State::Draining(reason) => self.drain(reason),
            State::Backoff => self.backoff().await,
            State::ShutDown => State::ShutDown,
        }
    }

    async fn connect(&mut self) -> State<C::Stream> {
        if self.shutdown.is_cancelled() {
            return State::ShutDown;
        }

        self.attempt += 1;
        tracing::info!(host = %self.config.host, port = self.config.port, "connecting");

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                return State::ShutDown;
            }
            result = self.connector.connect() => result,
        };

        match result {
            Ok(stream) => {
                tracing::info!("connected");
                State::Authenticating(BufReader::new(stream))
            }
            Err(error) => {
                tracing::warn!(?error, "failed to connect");
                State::Backoff
            }
        }
    }

    /// Reads the banner, and sends the login line. The server's response isn't
    /// checked, since we'll see soon enough if data arrives.
    async fn authenticate(&mut self, mut connection: BufReader<C::Stream>) -> State<C::Stream> {
        let mut banner = Vec::new();

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                return State::Draining(DrainReason::Shutdown);
            }
            result = tokio::time::timeout(self.config.read_timeout, connection.read_until(b'\n', &mut banner)) => result,
        };

        match result {
            Err(_) => return State::Draining(DrainReason::IdleTimeout),
            Ok(Err(error)) => return State::Draining(DrainReason::Io(error)),
            Ok(Ok(0)) => return State::Draining(DrainReason::Closed),
            Ok(Ok(_)) => {
                let banner = String::from_utf8_lossy(&banner);
                tracing::debug!(banner = banner.trim_end(), "received banner");
            }
        }

        let login = self.config.login_line();
        if let Err(error) = send_line(&mut connection, &login).await {
            return State::Draining(DrainReason::Io(error));
        }

        State::Streaming(connection)
    }

    async fn stream(&mut self, mut connection: BufReader<C::Stream>) -> State<C::Stream> {
        let end = read_frames(
            &mut connection,
            &self.shutdown,
            self.config.read_timeout,
            &mut self.dispatcher,
        )
        .await;

        let reason = match end {
            StreamEnd::IdleTimeout => DrainReason::IdleTimeout,
            StreamEnd::Cancelled => DrainReason::Shutdown,
            StreamEnd::Closed => DrainReason::Closed,
            StreamEnd::Failed(error) => DrainReason::Io(error),
        };

        State::Draining(reason)
    }

    fn drain(&self, reason: DrainReason) -> State<C::Stream> {
        match &reason {
            DrainReason::Io(error) => tracing::warn!(?error, "connection failed"),
            _ => tracing::info!(?reason, "connection closed"),
        }

        if self.shutdown.is_cancelled() {
            State::ShutDown
        }
        else {
            State::Backoff
        }
    }

    async fn backoff(&self) -> State<C::Stream> {
        tracing::info!(backoff = %humantime::format_duration(self.config.backoff), "sleeping");

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => State::ShutDown,
            _ = tokio::time::sleep(self.config.backoff) => State::Connecting,
        }
    }
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), std::io::Error> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        pin::Pin,
        sync::{
            Arc,
            Mutex,
        },
        task::{
            Context,
            Poll,
        },
        time::Duration,
    };

    use tokio::{
        io::{
            AsyncBufReadExt,
            AsyncRead,
            AsyncWrite,
            AsyncWriteExt,
            BufReader,
            DuplexStream,
            ReadBuf,
        },
        sync::mpsc,
        time::Instant,
    };
    use tokio_util::sync::CancellationToken;

    use crate::{
        config::Config,
        filter::Sighting,
        observer::LogObserver,
        session::{
            Client,
            Connect,
            DrainReason,
            State,
        },
    };

    const BANNER: &[u8] = b"# aprsc 2.1.19-g730c5c0\r\n";

    /// Hands out the given connection results in order, and refuses once they
    /// run out.
    #[derive(Debug)]
    struct MockConnector<S> {
        results: VecDeque<Result<S, std::io::Error>>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl<S> MockConnector<S> {
        fn new(
            results: impl IntoIterator<Item = Result<S, std::io::Error>>,
        ) -> (Self, Arc<Mutex<Vec<Instant>>>) {
            let attempts = Arc::new(Mutex::new(vec![]));
            let connector = Self {
                results: results.into_iter().collect(),
                attempts: attempts.clone(),
            };
            (connector, attempts)
        }
    }

    impl<S: AsyncRead + AsyncWrite + Unpin + Send> Connect for MockConnector<S> {
        type Stream = S;

        async fn connect(&mut self) -> Result<S, std::io::Error> {
            self.attempts.lock().unwrap().push(Instant::now());
            self.results
                .pop_front()
                .unwrap_or_else(|| Err(std::io::ErrorKind::ConnectionRefused.into()))
        }
    }

    /// Serves `data`, then fails with a connection reset. Writes are discarded.
    #[derive(Debug)]
    struct ResettingStream {
        data: &'static [u8],
    }

    impl AsyncRead for ResettingStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<Result<(), std::io::Error>> {
            if self.data.is_empty() {
                return Poll::Ready(Err(std::io::ErrorKind::ConnectionReset.into()));
            }

            let length = self.data.len().min(buf.remaining());
            let (head, tail) = self.data.split_at(length);
            buf.put_slice(head);
            self.data = tail;
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for ResettingStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<Result<usize, std::io::Error>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), std::io::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn refused<S>() -> Result<S, std::io::Error> {
        Err(std::io::ErrorKind::ConnectionRefused.into())
    }

    fn client<S>(
        connector: MockConnector<S>,
    ) -> (
        Client<MockConnector<S>, mpsc::UnboundedSender<Sighting>>,
        mpsc::UnboundedReceiver<Sighting>,
    ) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Client::new(connector, Config::default(), sender), receiver)
    }

    #[tokio::test(start_paused = true)]
    async fn it_backs_off_once_between_connection_attempts() {
        let (stream, _server) = tokio::io::duplex(1024);
        let (connector, attempts) = MockConnector::new([refused(), Ok(stream)]);
        let (mut client, _receiver) = client(connector);

        let state = client.step(State::Idle).await;
        assert!(matches!(state, State::Connecting));
        let state = client.step(state).await;
        assert!(matches!(state, State::Backoff));
        assert_eq!(attempts.lock().unwrap().len(), 1);

        let state = client.step(state).await;
        assert!(matches!(state, State::Connecting));
        assert_eq!(attempts.lock().unwrap().len(), 1);

        let state = client.step(state).await;
        assert!(matches!(state, State::Authenticating(_)));

        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 2);
        let delay = attempts[1] - attempts[0];
        assert!(delay >= Duration::from_secs(10));
        assert!(delay < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn it_logs_in_and_streams() {
        let (stream, server) = tokio::io::duplex(1024);
        let (connector, _attempts) = MockConnector::new([Ok(stream)]);
        let (mut client, mut receiver) = client(connector);
        let mut server = BufReader::new(server);

        server.write_all(BANNER).await.unwrap();

        let state = client.step(State::Connecting).await;
        let state = client.step(state).await;
        assert!(matches!(state, State::Streaming(_)));

        let mut login = String::new();
        server.read_line(&mut login).await.unwrap();
        assert_eq!(
            login,
            "user N0CALL pass -1 vers aprs-listener 0.1.0 filter t/ps\n"
        );

        server
            .write_all(b"M0ABC-9>APRS,TCPIP*,qAC,T2UK:!5130.44N/00045.00W>\r\n")
            .await
            .unwrap();
        drop(server);

        let state = client.step(state).await;
        assert!(matches!(state, State::Draining(DrainReason::Closed)));
        assert_eq!(receiver.try_recv().unwrap().sender, "M0ABC-9");

        let state = client.step(state).await;
        assert!(matches!(state, State::Backoff));
    }

    #[tokio::test(start_paused = true)]
    async fn it_reconnects_after_an_idle_timeout() {
        let (stream, mut server) = tokio::io::duplex(1024);
        let (connector, _attempts) = MockConnector::new([Ok(stream)]);
        let (mut client, _receiver) = client(connector);

        server.write_all(BANNER).await.unwrap();

        let state = client.step(State::Connecting).await;
        let state = client.step(state).await;
        assert!(matches!(state, State::Streaming(_)));

        let start = Instant::now();
        let state = client.step(state).await;
        assert!(matches!(state, State::Draining(DrainReason::IdleTimeout)));
        assert!(start.elapsed() >= Duration::from_secs(10));

        let state = client.step(state).await;
        assert!(matches!(state, State::Backoff));
    }

    #[tokio::test(start_paused = true)]
    async fn it_reconnects_after_a_read_error() {
        let stream = ResettingStream {
            data: b"# aprsc 2.1.19-g730c5c0\r\nM0ABC-9>APRS,TCPIP*,qAC,T2UK:!5130.44N/00045.00W>\r\n",
        };
        let (connector, _attempts) = MockConnector::new([Ok(stream)]);
        let (mut client, mut receiver) = client(connector);

        let state = client.step(State::Connecting).await;
        let state = client.step(state).await;
        assert!(matches!(state, State::Streaming(_)));

        let state = client.step(state).await;
        let State::Draining(DrainReason::Io(error)) = &state
        else {
            panic!("unexpected state: {}", state.name());
        };
        assert_eq!(error.kind(), std::io::ErrorKind::ConnectionReset);
        assert_eq!(receiver.try_recv().unwrap().sender, "M0ABC-9");

        let state = client.step(state).await;
        assert!(matches!(state, State::Backoff));
    }

    #[tokio::test(start_paused = true)]
    async fn it_reconnects_after_a_failed_login() {
        let (stream, mut server) = tokio::io::duplex(1024);
        let (connector, _attempts) = MockConnector::new([Ok(stream)]);
        let (mut client, _receiver) = client(connector);

        // the banner stays readable, but the login can't be written
        server.write_all(BANNER).await.unwrap();
        drop(server);

        let state = client.step(State::Connecting).await;
        assert!(matches!(state, State::Authenticating(_)));

        let state = client.step(state).await;
        let State::Draining(DrainReason::Io(error)) = &state
        else {
            panic!("unexpected state: {}", state.name());
        };
        assert_eq!(error.kind(), std::io::ErrorKind::BrokenPipe);

        let state = client.step(state).await;
        assert!(matches!(state, State::Backoff));
    }

    #[tokio::test(start_paused = true)]
    async fn it_times_out_waiting_for_the_banner() {
        let (stream, _server) = tokio::io::duplex(1024);
        let (connector, _attempts) = MockConnector::new([Ok(stream)]);
        let (mut client, _receiver) = client(connector);

        let state = client.step(State::Connecting).await;
        let state = client.step(state).await;
        assert!(matches!(state, State::Draining(DrainReason::IdleTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn it_shuts_down_during_an_idle_wait() {
        let (stream, mut server) = tokio::io::duplex(1024);
        let (connector, attempts) = MockConnector::new([Ok(stream)]);
        let shutdown = CancellationToken::new();
        let client =
            Client::new(connector, Config::default(), LogObserver).with_shutdown(shutdown.clone());

        server.write_all(BANNER).await.unwrap();

        let start = Instant::now();
        let handle = tokio::spawn(client.run());

        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn it_shuts_down_during_backoff() {
        let (connector, attempts) = MockConnector::<DuplexStream>::new([]);
        let shutdown = CancellationToken::new();
        let client =
            Client::new(connector, Config::default(), LogObserver).with_shutdown(shutdown.clone());

        let handle = tokio::spawn(client.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn it_does_not_connect_after_shutdown() {
        let (connector, attempts) = MockConnector::<DuplexStream>::new([]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        Client::new(connector, Config::default(), LogObserver)
            .with_shutdown(shutdown)
            .run()
            .await;

        assert!(attempts.lock().unwrap().is_empty());
    }
}
