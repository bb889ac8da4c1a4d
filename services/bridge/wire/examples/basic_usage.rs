//! Basic usage example for the mesh wire protocol.

use bytes::Bytes;
use plejd_wire::{
    keystream, transform, Command, CommandFrame, LinkAddress, NotificationFrame, ResponseType,
    SharedKey,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Plejd Wire Protocol Example ===\n");

    let key = SharedKey::from_hex("00112233-4455-6677-8899-aabbccddeeff")?;
    let link: LinkAddress = "AA:BB:CC:DD:EE:FF".parse()?;

    // 1. Build a command frame
    println!("1. Building a state-change command for device 11...");
    let frame = CommandFrame::from_hex(11, Command::StateChange, ResponseType::NoResponse, "01")?;
    let plain = frame.encode();
    println!("   Plaintext: {:02x?}", plain.as_ref());

    // 2. Encrypt it for the link
    println!("\n2. Encrypting for link {}...", link);
    println!("   Keystream: {:02x?}", keystream(&key, &link));
    let sealed = transform(&key, &link, &plain);
    println!("   Ciphertext: {:02x?}", sealed);

    // 3. Decrypt and decode as if it came back as a notification
    println!("\n3. Decoding the echoed frame...");
    let opened = Bytes::from(transform(&key, &link, &sealed));
    let notification = NotificationFrame::decode(opened)?;
    println!("   Sender: {}", notification.sender);
    match notification.known_command() {
        Some(command) => println!("   Command: {}", command),
        None => println!("   Command: unknown {:#06x}", notification.command),
    }
    println!("   Params: {:02x?}", notification.params.as_ref());

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
