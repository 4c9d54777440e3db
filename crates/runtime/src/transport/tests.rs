use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;

async fn write_raw_frame(writer: &mut tokio::io::DuplexStream, message: &Value) {
	let json_bytes = serde_json::to_vec(message).unwrap();
	let length = json_bytes.len() as u32;
	writer.write_all(&length.to_le_bytes()).await.unwrap();
	writer.write_all(&json_bytes).await.unwrap();
	writer.flush().await.unwrap();
}

#[test]
fn test_length_prefix_encoding() {
	let length: u32 = 1234;
	let bytes = length.to_le_bytes();

	assert_eq!(bytes[0], (length & 0xFF) as u8);
	assert_eq!(bytes[1], ((length >> 8) & 0xFF) as u8);
	assert_eq!(bytes[2], ((length >> 16) & 0xFF) as u8);
	assert_eq!(bytes[3], ((length >> 24) & 0xFF) as u8);
	assert_eq!(u32::from_le_bytes(bytes), length);
}

#[tokio::test]
async fn test_send_message() {
	let (stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, _stdout_write) = tokio::io::duplex(1024);

	let (transport, _rx) = PipeTransport::new(stdin_write, stdout_read);
	let (mut sender, _receiver) = transport.into_parts();

	let call = serde_json::json!({
		"serial": 1,
		"path": "/org/freedesktop/portal/desktop",
		"interface": "org.freedesktop.portal.Usb",
		"member": "CreateSession",
		"body": ["", {}]
	});

	sender.send(call.clone()).await.unwrap();

	let (mut read_half, _write_half) = tokio::io::split(stdin_read);
	let mut len_buf = [0u8; 4];
	read_half.read_exact(&mut len_buf).await.unwrap();
	let length = u32::from_le_bytes(len_buf) as usize;

	let mut msg_buf = vec![0u8; length];
	read_half.read_exact(&mut msg_buf).await.unwrap();

	let received: Value = serde_json::from_slice(&msg_buf).unwrap();
	assert_eq!(received, call);
}

#[tokio::test]
async fn test_multiple_messages_in_sequence() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(4096);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(4096);

	let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
	let read_task = tokio::spawn(async move { transport.run().await });

	let messages = vec![
		serde_json::json!({"reply_serial": 1, "body": [":1.7"]}),
		serde_json::json!({"path": "/a", "interface": "i", "member": "first", "body": []}),
		serde_json::json!({"path": "/a", "interface": "i", "member": "second", "body": []}),
	];

	for msg in &messages {
		write_raw_frame(&mut stdout_write, msg).await;
	}

	for expected in &messages {
		let received = rx.recv().await.unwrap();
		assert_eq!(&received, expected);
	}

	drop(stdout_write);
	drop(rx);
	let _ = read_task.await;
}

#[tokio::test]
async fn test_large_message() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024 * 1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024 * 1024);

	let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
	let read_task = tokio::spawn(async move { transport.run().await });

	let large_message = serde_json::json!({
		"reply_serial": 1,
		"body": ["x".repeat(100_000)]
	});
	write_raw_frame(&mut stdout_write, &large_message).await;

	let received = rx.recv().await.unwrap();
	assert_eq!(received, large_message);

	drop(stdout_write);
	drop(rx);
	let _ = read_task.await;
}

#[tokio::test]
async fn test_undecodable_frame_is_skipped() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
	let read_task = tokio::spawn(async move { transport.run().await });

	let garbage = b"{not json";
	stdout_write
		.write_all(&(garbage.len() as u32).to_le_bytes())
		.await
		.unwrap();
	stdout_write.write_all(garbage).await.unwrap();

	let message = serde_json::json!({"reply_serial": 2});
	write_raw_frame(&mut stdout_write, &message).await;

	assert_eq!(rx.recv().await.unwrap(), message);

	drop(stdout_write);
	drop(rx);
	let _ = read_task.await;
}

#[tokio::test]
async fn test_oversized_length_prefix() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);

	stdout_write
		.write_all(&(MAX_FRAME_LEN as u32 + 1).to_le_bytes())
		.await
		.unwrap();
	stdout_write.flush().await.unwrap();

	let result = transport.run().await;
	assert!(result.unwrap_err().to_string().contains("exceeds limit"));
}

#[tokio::test]
async fn test_malformed_length_prefix() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);

	stdout_write.write_all(&[0x01, 0x02]).await.unwrap();
	stdout_write.flush().await.unwrap();
	drop(stdout_write);

	let result = transport.run().await;
	assert!(
		result
			.unwrap_err()
			.to_string()
			.contains("Failed to read length prefix")
	);
}

#[tokio::test]
async fn test_broken_pipe() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, stdout_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);
	drop(stdout_write);

	let read_task = tokio::spawn(async move { transport.run().await });
	let result = read_task.await.unwrap();
	assert!(result.is_err());
}
