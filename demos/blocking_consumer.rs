use dmxp_mq::trace::init_tracing;
use dmxp_mq::{MqError, MqNode};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), MqError> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let uri = args.get(1).map(String::as_str).unwrap_or("local://blocking?verbose");
    let count: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);

    println!("Blocking Consumer: Binding {}", uri);
    let node = Arc::new(MqNode::bind_uri(uri)?);
    node.wait_enable(Duration::from_secs(1))?;

    let consumer = {
        let node = Arc::clone(&node);
        thread::spawn(move || {
            println!("Blocking Consumer: Waiting for messages...");
            loop {
                match node.recv_wait(Duration::ZERO) {
                    Ok(msg) => println!("Received: {}", msg.to_string_lossy()),
                    Err(MqError::Canceled) => {
                        println!("Blocking Consumer: Queue closed");
                        break;
                    }
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        break;
                    }
                }
            }
        })
    };

    for i in 0..count {
        node.send_str(&format!("tick {}", i))?;
        thread::sleep(Duration::from_millis(50));
    }
    node.send_close_msg()?;

    let _ = consumer.join();
    node.join()
}
