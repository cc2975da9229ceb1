//! Line server tests over real sockets

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskline_shell::{
    CommandContainer, CommandDef, CommandOutput, CommandSpec, ContainerFactory, InterpreterConfig,
    LineServer, Pager, Param,
};
use taskline_task::OutputSequence;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct Store {
    values: Mutex<BTreeMap<String, String>>,
    teardowns: Arc<AtomicUsize>,
}

impl CommandContainer for Store {
    fn commands() -> Vec<CommandDef<Self>> {
        vec![
            CommandDef::new(
                CommandSpec::new("set")
                    .param(Param::positional("key"))
                    .param(Param::positional("value")),
                |store: &Store, args, _| {
                    let key = args.str("key")?;
                    let value = args.str("value")?;
                    store.values.lock().insert(key.to_string(), value.to_string());
                    Ok(CommandOutput::value(format!("setting {}={}", key, value)))
                },
            ),
            CommandDef::new(CommandSpec::new("show").param(Param::positional("key")), |store: &Store, args, _| {
                let key = args.str("key")?;
                match store.values.lock().get(key) {
                    Some(value) => Ok(CommandOutput::value(format!("{}={}", key, value))),
                    None => Ok(CommandOutput::value(format!("{}: not found", key))),
                }
            }),
            CommandDef::new(CommandSpec::new("lines").param(Param::positional("n").int()), |_: &Store, args, _| {
                Ok(OutputSequence::values(1..=args.int("n")?).into())
            }),
        ]
    }

    fn teardown(&mut self) -> taskline_foundation::Result<()> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn start_server(teardowns: Arc<AtomicUsize>) -> (SocketAddr, oneshot::Sender<()>) {
    start_server_with(teardowns, InterpreterConfig::default(), 1024).await
}

async fn start_server_with(
    teardowns: Arc<AtomicUsize>,
    config: InterpreterConfig,
    max_line_length: usize,
) -> (SocketAddr, oneshot::Sender<()>) {
    let factory: ContainerFactory<Store> = Arc::new(move || Store {
        values: Mutex::new(BTreeMap::new()),
        teardowns: Arc::clone(&teardowns),
    });
    let server = LineServer::bind("127.0.0.1:0", factory, config, "\r\n")
        .await
        .unwrap()
        .with_max_line_length(max_line_length);
    let addr = server.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.serve(async move {
        let _ = rx.await;
    }));
    (addr, tx)
}

#[derive(Default)]
struct RecordingPager {
    pages: Mutex<Vec<String>>,
}

impl Pager for RecordingPager {
    fn page(&self, text: &str) -> std::io::Result<()> {
        self.pages.lock().push(text.to_string());
        Ok(())
    }
}

async fn wait_for_teardown(teardowns: &AtomicUsize) {
    for _ in 0..100 {
        if teardowns.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

struct Client {
    stream: TcpStream,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let mut client = Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        };
        assert_eq!(client.read_until_prompt().await, "");
        client
    }

    /// Everything up to the next prompt, without the prompt
    async fn read_until_prompt(&mut self) -> String {
        let mut received = Vec::new();
        let mut byte = [0u8; 1];
        while !received.ends_with(b"i> ") {
            let n = self.stream.read(&mut byte).await.unwrap();
            assert!(n > 0, "connection closed early: {:?}", String::from_utf8_lossy(&received));
            received.push(byte[0]);
        }
        received.truncate(received.len() - 3);
        String::from_utf8(received).unwrap()
    }

    async fn send(&mut self, line: &str) -> String {
        self.stream.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
        self.read_until_prompt().await
    }
}

#[tokio::test]
async fn test_request_response() {
    let (addr, _shutdown) = start_server(Arc::new(AtomicUsize::new(0))).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.send("set a 1").await, "setting a=1\r\n");
    assert_eq!(client.send("show a").await, "a=1\r\n");
    assert_eq!(client.send("lines 3").await, "1\r\n2\r\n3\r\n");
    assert_eq!(client.send("bogus").await, "UsageError: unknown command: bogus\r\n");
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let (addr, _shutdown) = start_server(Arc::new(AtomicUsize::new(0))).await;
    let mut first = Client::connect(addr).await;
    let mut second = Client::connect(addr).await;

    assert_eq!(first.send("set a 1").await, "setting a=1\r\n");
    assert_eq!(second.send("show a").await, "a: not found\r\n");
    assert_eq!(second.send(".list FINISHED").await, "<SyncTask 1 [show a] FINISHED>\r\n");
}

#[tokio::test]
async fn test_eof_closes_session() {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let (addr, _shutdown) = start_server(Arc::clone(&teardowns)).await;
    let mut client = Client::connect(addr).await;

    client.stream.write_all(b"EOF\r\n").await.unwrap();
    let mut rest = Vec::new();
    client.stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    wait_for_teardown(&teardowns).await;
}

#[tokio::test]
async fn test_long_output_is_sent_to_the_client() {
    let pager = Arc::new(RecordingPager::default());
    let config = InterpreterConfig::default().with_pager(Some(Arc::clone(&pager) as Arc<dyn Pager>));
    let (addr, _shutdown) = start_server_with(Arc::new(AtomicUsize::new(0)), config, 1024).await;
    let mut client = Client::connect(addr).await;

    let lines: Vec<String> = (1..=25).map(|n| n.to_string()).collect();
    let expected = format!("{}\r\n", lines.join("\r\n"));
    assert_eq!(client.send("lines 25").await, expected);
    assert_eq!(
        client.send(".output 1").await,
        format!("<SyncTask 1 [lines 25] FINISHED>\r\n{}", expected)
    );
    assert!(pager.pages.lock().is_empty());
}

#[tokio::test]
async fn test_overlong_line_closes_session() {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let (addr, _shutdown) = start_server_with(Arc::clone(&teardowns), InterpreterConfig::default(), 16).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.send("show a").await, "a: not found\r\n");
    let long = format!("set {} 1\r\n", "x".repeat(64));
    client.stream.write_all(long.as_bytes()).await.unwrap();

    let mut received = Vec::new();
    let mut byte = [0u8; 1];
    while !received.ends_with(b"\r\n") {
        let n = client.stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed early");
        received.push(byte[0]);
    }
    assert_eq!(
        String::from_utf8(received).unwrap(),
        "UsageError: line longer than 16 bytes\r\n"
    );
    wait_for_teardown(&teardowns).await;
}
