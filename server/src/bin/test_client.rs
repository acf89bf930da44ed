use clap::Parser;
use rand::seq::SliceRandom;
use railyard_shared::{
    decode_datagram, encode, ClientPacket, Direction, Role, ServerPacket, MAX_DATAGRAM_SIZE,
    PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, timeout, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless client that joins and steers randomly")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    server: String,

    /// Nickname to join with
    #[arg(short, long, default_value = "prober")]
    nickname: String,

    /// Join as an observer instead of a player
    #[arg(short, long)]
    observe: bool,

    /// Seconds to stay connected
    #[arg(short, long, default_value = "30")]
    duration: u64,

    /// Also print the per-tick state diffs
    #[arg(short, long)]
    verbose: bool,
}

async fn send(
    socket: &UdpSocket,
    packet: &ClientPacket,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&encode(packet)?, addr).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Create local socket
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let server_addr = args.server.parse::<SocketAddr>()?;
    let role = if args.observe {
        Role::Observer
    } else {
        Role::Player
    };

    println!("Joining {} as {} ({:?})", server_addr, args.nickname, role);
    let join = ClientPacket::Join {
        nickname: args.nickname.clone(),
        role,
        client_version: PROTOCOL_VERSION,
    };
    send(&socket, &join, server_addr).await?;

    let mut rng = rand::thread_rng();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut steer = interval(Duration::from_millis(500));
    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut joined = false;
    let mut respawn_at: Option<Instant> = None;

    while Instant::now() < deadline {
        tokio::select! {
            _ = steer.tick() => {
                if respawn_at.is_some_and(|at| Instant::now() >= at) {
                    respawn_at = None;
                    send(&socket, &ClientPacket::RespawnRequest, server_addr).await?;
                } else if joined && role == Role::Player {
                    if let Some(heading) = Direction::ALL.choose(&mut rng) {
                        send(&socket, &ClientPacket::Direction { heading: *heading }, server_addr).await?;
                    }
                }
            }
            received = timeout(Duration::from_secs(5), socket.recv_from(&mut buf)) => {
                let (len, _) = match received {
                    Ok(result) => result?,
                    Err(_) => {
                        println!("No response from server for 5s");
                        continue;
                    }
                };

                for record in decode_datagram::<ServerPacket>(&buf[..len]) {
                    let packet = match record {
                        Ok(packet) => packet,
                        Err(e) => {
                            println!("Malformed record: {}", e);
                            continue;
                        }
                    };

                    match &packet {
                        ServerPacket::JoinAck { room_id, expected_version } => {
                            joined = true;
                            println!("Joined {} (server protocol {})", room_id, expected_version);
                        }
                        ServerPacket::JoinFailed { reason } => {
                            println!("Join failed: {}", reason);
                            return Ok(());
                        }
                        ServerPacket::Ping => send(&socket, &ClientPacket::Pong, server_addr).await?,
                        ServerPacket::Death { remaining, reason } => {
                            println!("Died ({:?}), respawn in {:.2}s", reason, remaining);
                            respawn_at = Some(Instant::now() + Duration::from_secs_f64(remaining.max(0.0)));
                        }
                        ServerPacket::State { .. } if !args.verbose => {}
                        ServerPacket::MatchOver { rankings, duration } => {
                            println!("Match over after {}s", duration);
                            for (place, ranking) in rankings.iter().enumerate() {
                                println!("  {}. {} ({})", place + 1, ranking.name, ranking.best_score);
                            }
                        }
                        ServerPacket::Disconnect { reason } => {
                            println!("Disconnected: {}", reason);
                            return Ok(());
                        }
                        other => println!("Received {:?}", other),
                    }
                }
            }
        }
    }

    send(&socket, &ClientPacket::Leave, server_addr).await?;
    println!("Left after {}s", args.duration);
    Ok(())
}
