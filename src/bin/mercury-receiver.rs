//! UDP receiver binary: binds a socket, drives the frame decoder, and
//! forwards completed frames to a processing pipeline running on its own
//! thread.
//!
//! Grounded on `morgul-live.rs::listen_port`'s socket2-based receive loop
//! and per-port thread model, generalized from a fixed-size SLS detector
//! header to the Mercury decoder's peek/next-buffer/process-packet split.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use socket2::{Domain, Socket, Type};

use mercury_dataplane::decoder::{DecoderConfig, UdpFrameDecoder};
use mercury_dataplane::geometry::PACKET_HEADER_SIZE;
use mercury_dataplane::pipeline::{
    AdditionStage, CalibrationStage, DiscriminationStage, HistogramStage, NextFrameStage, Pipeline, ReorderStage,
    Stage, StageConfig, ThresholdStage,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// UDP port to receive detector frame data on.
    #[arg(long, default_value = "61651")]
    udp_port: u16,

    /// Address to bind the receive socket to.
    #[arg(long, default_value = "0.0.0.0")]
    bind_address: String,

    /// "port:idx,..." map of FEM source ports to buffer indices; currently
    /// at most one entry is honored.
    #[arg(long, default_value = "61651:0")]
    fem_port_map: String,

    /// "RxC" sensor layout, rows by columns of 80x80 sensors.
    #[arg(long, default_value = "2x2")]
    sensors_layout: String,

    /// Milliseconds of inactivity before an incomplete frame is timed out.
    #[arg(long, default_value = "1000")]
    frame_timeout_ms: u64,

    /// Number of frame buffers held in the decoder's free pool.
    #[arg(long, default_value = "8")]
    pool_capacity: usize,

    /// Emit a trace-level hex dump of every packet header.
    #[arg(long, default_value = "false")]
    packet_logging: bool,

    /// Also emit an untouched raw_frames copy of every widened frame.
    #[arg(long, default_value = "true")]
    write_raw_data: bool,

    /// Use the Discrimination charged-sharing stage instead of Addition.
    #[arg(long, default_value = "false")]
    use_discrimination: bool,

    /// Charged-sharing neighbourhood size (odd, e.g. 3 for a 3x3 grid).
    #[arg(long, default_value = "3")]
    pixel_grid_size: i64,

    /// "none" | "value" | "filename"
    #[arg(long, default_value = "none")]
    threshold_mode: String,

    #[arg(long, default_value = "0")]
    threshold_value: f64,

    #[arg(long, default_value = "")]
    threshold_filename: String,

    #[arg(long, default_value = "")]
    gradients_filename: String,

    #[arg(long, default_value = "")]
    intercepts_filename: String,

    /// Number of processed frames between histogram flushes (0 disables
    /// periodic flushing).
    #[arg(long, default_value = "0")]
    max_frames_received: i64,
}

fn build_pipeline(args: &Args, release_tx: mpsc::Sender<mercury_dataplane::buffer::FrameBuffer>) -> Pipeline {
    let layout = mercury_dataplane::geometry::SensorLayout::parse(&args.sensors_layout)
        .expect("sensors layout already validated by the decoder");

    let reorder = ReorderStage::new(layout, args.write_raw_data);

    let mut calibration = CalibrationStage::new(layout);
    let mut calib_config = StageConfig::new();
    calib_config
        .set("gradients_filename", &args.gradients_filename)
        .set("intercepts_filename", &args.intercepts_filename);
    // Startup configuration never requests a flush, so there are no
    // frames to forward here.
    let _ = calibration.configure(&calib_config);

    let mut threshold = ThresholdStage::new(layout);
    let mut threshold_config = StageConfig::new();
    threshold_config
        .set("threshold_mode", &args.threshold_mode)
        .set("threshold_value", args.threshold_value)
        .set("threshold_filename", &args.threshold_filename);
    let _ = threshold.configure(&threshold_config);

    let mut histogram = HistogramStage::new(layout);
    let mut histogram_config = StageConfig::new();
    histogram_config.set("max_frames_received", args.max_frames_received);
    let _ = histogram.configure(&histogram_config);

    let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(calibration)];

    // Addition and Discrimination are mutually exclusive.
    if args.use_discrimination {
        let mut discrimination = DiscriminationStage::new(layout);
        let mut config = StageConfig::new();
        config.set("pixel_grid_size", args.pixel_grid_size);
        let _ = discrimination.configure(&config);
        stages.push(Box::new(discrimination));
    } else {
        let mut addition = AdditionStage::new(layout);
        let mut config = StageConfig::new();
        config.set("pixel_grid_size", args.pixel_grid_size);
        let _ = addition.configure(&config);
        stages.push(Box::new(addition));
    }

    stages.push(Box::new(threshold));
    stages.push(Box::new(NextFrameStage::new(layout)));
    stages.push(Box::new(histogram));

    Pipeline::new(reorder, stages, release_tx)
}

fn receive_loop(socket: UdpSocket, mut decoder: UdpFrameDecoder, release_rx: mpsc::Receiver<mercury_dataplane::buffer::FrameBuffer>) -> ! {
    let mut recv_buf = vec![0u8; 9000];

    loop {
        while let Ok(buffer) = release_rx.try_recv() {
            decoder.release_buffer(buffer);
        }

        let (size, _src) = match socket.recv_from(&mut recv_buf) {
            Ok(result) => result,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                decoder.monitor_buffers();
                continue;
            }
            Err(e) => {
                log::error!("recv_from failed: {e}");
                continue;
            }
        };

        if size < PACKET_HEADER_SIZE {
            log::warn!("Dropping runt packet of {size} bytes");
            continue;
        }

        let header = mercury_dataplane::protocol::PacketHeader::from_bytes(&recv_buf[..PACKET_HEADER_SIZE]);
        let src_port = _src.port();
        decoder.peek_packet_header(&header, src_port, Some(_src));

        let expected = decoder.next_payload_size();
        let payload = &recv_buf[PACKET_HEADER_SIZE..size];
        let copy_len = payload.len().min(expected);
        decoder.next_payload_buffer()[..copy_len].copy_from_slice(&payload[..copy_len]);
        decoder.process_packet(copy_len);
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    log::info!("mercury-receiver starting on {}:{}", args.bind_address, args.udp_port);

    let decoder_config = DecoderConfig {
        fem_port_map: args.fem_port_map.clone(),
        sensors_layout: args.sensors_layout.clone(),
        frame_timeout_ms: args.frame_timeout_ms,
        pool_capacity: args.pool_capacity,
        packet_logging: args.packet_logging,
    };

    let (ready_tx, ready_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();

    let decoder = UdpFrameDecoder::new(decoder_config, ready_tx).expect("invalid decoder configuration");

    let mut pipeline = build_pipeline(&args, release_tx);
    let pipeline_thread = thread::spawn(move || {
        for buffer in ready_rx {
            let frames = pipeline.process(buffer);
            for frame in &frames {
                log::debug!(
                    "emitted frame {} dataset={:?} pixels={}",
                    frame.metadata.frame_number,
                    frame.metadata.dataset,
                    frame.payload.len()
                );
            }
        }
    });

    let bind_addr: SocketAddr = format!("{}:{}", args.bind_address, args.udp_port)
        .parse()
        .expect("invalid bind address");

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).expect("failed to create socket");
    socket
        .set_recv_buffer_size(512 * 1024 * 1024)
        .expect("failed to size receive buffer");
    socket.bind(&bind_addr.into()).expect("failed to bind socket");
    socket
        .set_read_timeout(Some(Duration::from_millis(100)))
        .expect("failed to set read timeout");
    let socket: UdpSocket = socket.into();

    receive_loop(socket, decoder, release_rx);

    pipeline_thread.join().expect("pipeline thread panicked");
}
