// In demos/producer.rs
use dmxp_mq::trace::init_tracing;
use dmxp_mq::{MqError, NodeBuilder};
use sha2::{Digest, Sha256};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> Result<(), MqError> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <num_messages> [--auto-exit]", args[0]);
        std::process::exit(1);
    }

    let num_messages: usize = match args[1].parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("Invalid number of messages: {}", args[1]);
            std::process::exit(1);
        }
    };
    let auto_exit = args.get(2).map(|s| s == "--auto-exit").unwrap_or(false);

    println!("Producer: Precomputing {} hashes...", num_messages);

    let start_precompute = Instant::now();
    let hashes: Vec<String> = (0..num_messages)
        .map(|i| {
            let mut hasher = Sha256::new();
            hasher.update(format!("message_{}", i).as_bytes());
            format!("{:x}", hasher.finalize())
        })
        .collect();
    println!(
        "Producer: Precomputed {} hashes in {:.2?}",
        num_messages,
        start_precompute.elapsed()
    );

    let node = Arc::new(
        NodeBuilder::new()
            .with_address("producer-demo")
            .with_recv_queue_size(num_messages.max(1))
            .with_wait_on_activation(Duration::from_secs(1))
            .connect()?,
    );

    let keep_alive = Arc::new(AtomicBool::new(true));
    let keep_alive_for_handler = Arc::clone(&keep_alive);
    if let Err(e) = ctrlc::set_handler(move || {
        keep_alive_for_handler.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl+C handler: {}", e);
    }

    // Verifies every hash as it comes off the receive queue.
    let consumer = {
        let node = Arc::clone(&node);
        thread::spawn(move || {
            let mut received = 0usize;
            while received < num_messages {
                match node.recv_wait(Duration::from_secs(5)) {
                    Ok(msg) => {
                        let text = msg.to_string_lossy();
                        let ok = text.split_once(':').map_or(false, |(i, hash)| {
                            let mut hasher = Sha256::new();
                            hasher.update(format!("message_{}", i).as_bytes());
                            format!("{:x}", hasher.finalize()) == hash
                        });
                        if !ok {
                            eprintln!("Consumer: Hash mismatch in {:?}", text);
                        }
                        received += 1;
                    }
                    Err(e) => {
                        eprintln!("Consumer: Stopped after {} messages: {}", received, e);
                        break;
                    }
                }
            }
            received
        })
    };

    println!("Producer: Sending {} hashes...", num_messages);
    let start_send = Instant::now();
    let mut sent = 0;

    for (i, hash) in hashes.iter().enumerate() {
        // Format: "message_number:hash"
        let message = format!("{}:{}", i, hash);

        loop {
            if !keep_alive.load(Ordering::SeqCst) {
                break;
            }
            match node.send_str(&message) {
                Ok(()) => {
                    sent += 1;
                    if sent % 100 == 0 {
                        println!("Sent {} messages", sent);
                    }
                    break;
                }
                Err(MqError::NotReady { .. }) => {
                    // Every slot is in flight, retry
                    thread::sleep(Duration::from_micros(10));
                }
                Err(e) => {
                    eprintln!("Failed to send message {}: {}", i, e);
                    break;
                }
            }
        }
    }

    let send_time = start_send.elapsed();
    println!("Producer: Sent {} messages in {:.2?}", sent, send_time);
    println!(
        "Producer: Throughput: {:.2} messages/sec",
        sent as f64 / send_time.as_secs_f64()
    );

    if !auto_exit {
        println!("Press Ctrl+C to exit...");
        while keep_alive.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
        }
    }

    node.send_close_msg()?;
    let received = consumer.join().unwrap_or(0);
    if received == num_messages {
        println!("All messages received successfully");
    } else {
        println!("Consumer received {}/{} messages", received, num_messages);
    }
    node.join()?;

    println!("Producer: Shutting down");
    Ok(())
}
