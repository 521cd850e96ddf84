use clap::Parser;
use shared::{encode, Frame, Opcode};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

/// Joins a relay, announces a nickname and prints everything it receives
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay stream address
    #[arg(short, long, default_value = "127.0.0.1:30813")]
    server: String,

    /// Nickname to announce
    #[arg(short, long, default_value = "TestClient")]
    name: String,

    /// Map to offer if the server asks for one
    #[arg(short, long, default_value = "/levels/gridmap/level.json")]
    map: String,

    /// Seconds to listen before quitting
    #[arg(short, long, default_value = "5")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {} from {}", args.server, stream.local_addr()?);
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer.write_all(encode("USER", &args.name).as_bytes()).await?;
    writer.write_all(encode("PING", "").as_bytes()).await?;
    writer.write_all(encode("CHAT", "hello from the test client").as_bytes()).await?;

    // Datagram side: ping the port next to the stream port
    let udp = UdpSocket::bind("0.0.0.0:0").await?;
    let stream_addr: std::net::SocketAddr = args.server.parse()?;
    let udp_addr = std::net::SocketAddr::new(stream_addr.ip(), stream_addr.port().wrapping_add(1));
    udp.send_to(encode("PING", "").as_bytes(), udp_addr).await?;
    let mut buf = [0u8; 2048];
    match timeout(Duration::from_secs(1), udp.recv_from(&mut buf)).await {
        Ok(Ok((len, from))) => {
            println!("[UDP] {} <- {}", String::from_utf8_lossy(&buf[..len]).trim_end(), from)
        }
        _ => println!("[UDP] no reply"),
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.duration);
    while let Ok(Ok(Some(line))) = tokio::time::timeout_at(deadline, lines.next_line()).await {
        let frame = Frame::decode(&line);
        println!("[TCP] {}", frame);

        if frame.opcode() == Opcode::MapRequest {
            writer.write_all(encode("MAPS", &args.map).as_bytes()).await?;
        }
    }

    writer.write_all(encode("QUIT", "").as_bytes()).await?;
    println!("Done");
    Ok(())
}
