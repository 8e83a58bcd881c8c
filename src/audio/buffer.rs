//! Lock-free ring buffer for audio data
//!
//! Single-producer/single-consumer circular buffer for passing samples
//! between the real-time callbacks and the processing worker. The producer
//! half lives on the capture callback, the consumer half on whichever side
//! drains it; neither half ever allocates, locks, or blocks after
//! construction.

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

/// Thread-safe audio ring buffer
///
/// Capacity is rounded up to the next power of two so index wraparound
/// stays a cheap bitwise mask inside the underlying buffer.
pub struct AudioRingBuffer {
    rb: HeapRb<f32>,
    capacity: usize,
}

impl AudioRingBuffer {
    /// Create a new ring buffer holding at least `min_capacity` samples.
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.next_power_of_two();
        Self {
            rb: HeapRb::new(capacity),
            capacity,
        }
    }

    /// Split into producer and consumer ends.
    pub fn split(self) -> (AudioProducer, AudioConsumer) {
        let capacity = self.capacity;
        let (producer, consumer) = self.rb.split();

        (
            AudioProducer { producer, capacity },
            AudioConsumer { consumer, capacity },
        )
    }

    /// Get buffer capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Producer end of the ring buffer (exactly one writer thread).
pub struct AudioProducer {
    producer: HeapProducer<f32>,
    capacity: usize,
}

impl AudioProducer {
    /// Write samples to the buffer.
    ///
    /// Copies at most the writable count. Samples that do not fit are
    /// silently dropped; the caller is a real-time thread and must never
    /// wait for space.
    ///
    /// # Returns
    /// Number of samples actually written.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        self.producer.push_slice(samples)
    }

    /// Number of samples that can currently be written.
    pub fn writable(&self) -> usize {
        self.producer.free_len()
    }

    /// Get buffer capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer end of the ring buffer (exactly one reader thread).
pub struct AudioConsumer {
    consumer: HeapConsumer<f32>,
    capacity: usize,
}

impl AudioConsumer {
    /// Read samples from the buffer.
    ///
    /// Copies at most the readable count into `buffer`.
    ///
    /// # Returns
    /// Number of samples actually read.
    pub fn read(&mut self, buffer: &mut [f32]) -> usize {
        self.consumer.pop_slice(buffer)
    }

    /// Number of samples currently available to read.
    pub fn readable(&self) -> usize {
        self.consumer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    /// Get buffer capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
