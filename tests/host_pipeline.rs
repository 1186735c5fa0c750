use sense_reco::cfl_io::{read_image, write_image, RecordedStream};
use sense_reco::simulate::{PhantomSimulator, SimulationSettings};
use sense_reco::{Collaborators, SenseStage, StageOutput, StageParameters};

fn settings() -> SimulationSettings {
    SimulationSettings { matrix_size: [8, 8], channels: 2, samples_per_profile: 16, ..Default::default() }
}

fn stage_params() -> StageParameters {
    StageParameters { profiles_per_frame: 16, shared_profiles: 8, number_of_iterations: 10, ..Default::default() }
}

#[test]
fn simulated_stream_reconstructs_the_phantom() {
    let simulator = PhantomSimulator::new(settings()).unwrap();
    let phantom = simulator.phantom().clone();
    let mut stage = SenseStage::new(stage_params(), Collaborators::host(), Vec::new());
    stage.configure(&simulator.stream_header()).unwrap();
    for profile in simulator.take(32) {
        stage.process(profile.unwrap()).unwrap();
    }
    assert_eq!(stage.images_reconstructed(), 3);
    assert_eq!(stage.buffered_profiles(), 8);

    let images: Vec<_> = stage.into_downstream().into_iter().filter_map(|o| match o {
        StageOutput::Image(image) => Some(image),
        StageOutput::Profile(_) => None,
    }).collect();
    let last = images.last().unwrap();
    assert_eq!(last.header.image_index, 3);
    assert_eq!(last.header.acquisition_time_stamp, 31);
    assert!(last.data.iter().all(|v| v.re.is_finite() && v.im.is_finite()));
    // the bright centre of the phantom stands out against the empty corner
    assert_eq!(phantom[[4, 4]].re, 2.);
    assert!(last.data[[4, 4]].norm() > 2. * last.data[[0, 0]].norm());
}

#[test]
fn recorded_stream_replays_through_the_stage() {
    let dir = tempfile::tempdir().unwrap();
    let simulator = PhantomSimulator::new(settings()).unwrap();
    let recording = RecordedStream::create(dir.path().join("stream"), &simulator.stream_header()).unwrap();
    for (index, profile) in simulator.take(16).enumerate() {
        recording.write_profile(index, &profile.unwrap()).unwrap();
    }

    let mut stage = SenseStage::new(stage_params(), Collaborators::host(), Vec::new());
    stage.configure(&recording.header().unwrap()).unwrap();
    for profile in recording.profiles().unwrap() {
        stage.process(profile.unwrap()).unwrap();
    }
    let output = stage.into_downstream();
    let image = output[0].as_image().unwrap();
    let stem = write_image(dir.path(), image).unwrap();
    assert_eq!(&read_image(stem).unwrap(), image);
}
